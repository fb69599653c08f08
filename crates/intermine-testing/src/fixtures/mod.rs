mod transport;

use std::sync::{Arc, Once};
use std::time::Duration;

use intermine_client::{ClientError, Method, ModelRegistry, ServiceConnection};

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub use transport::{MockTransport, Reply};

pub use intermine_model::fixtures::{test_model, TEST_MODEL_JSON};

pub const TEMPLATES_JSON: &str = include_str!("data/templates.json");

pub const LISTS_JSON: &str = include_str!("data/lists.json");

pub const BASE_URL: &str = "http://mock.intermine.test/service";

const TRACKED_CRATES: &[&str] = &["intermine_client", "intermine_query", "intermine_model", "testing"];

static INIT: Once = Once::new();

fn init_logger() {
    INIT.call_once(|| {
        let directives = TRACKED_CRATES
            .iter()
            .map(|crate_name| format!("{}=trace", crate_name))
            .collect::<Vec<_>>()
            .join(",");

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

        // Another test harness may have installed a subscriber already.
        let _ = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_test_writer()
            .finish()
            .try_init();
    });
}

/// Renders rows as a tab-separated result body.
pub fn tab_rows(rows: &[&[&str]]) -> String {
    rows.iter()
        .map(|row| format!("{}\n", row.join("\t")))
        .collect()
}

/// A fake InterMine service: a mock transport serving the test model, templates and lists.
pub struct MockService {
    pub transport: Arc<MockTransport>,
    pub registry: Arc<ModelRegistry>,
    pub base_url: String,
}

impl MockService {
    pub fn new() -> Self {
        init_logger();

        let transport = Arc::new(MockTransport::new(BASE_URL));
        transport.reply("/model", Reply::ok(TEST_MODEL_JSON));
        transport.reply("/templates", Reply::ok(TEMPLATES_JSON));
        transport.reply("/version", Reply::ok("33\n"));
        transport.reply("/version/release", Reply::ok("testmodel 2024-01\n"));
        transport.reply_to(Method::Get, "/lists", Reply::ok(LISTS_JSON));

        Self {
            transport,
            registry: Arc::new(ModelRegistry::new()),
            base_url: String::from(BASE_URL),
        }
    }

    /// Opens a connection sharing this service's registry.
    pub fn connect(&self) -> Result<ServiceConnection, ClientError> {
        ServiceConnection::builder()
            .with_base_url(self.base_url.clone())
            .with_transport(self.transport.clone())
            .with_registry(self.registry.clone())
            .with_read_timeout(Duration::from_secs(5))
            .build()
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}
