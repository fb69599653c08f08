use std::time::Duration;

use serde::{Deserialize, Serialize};

use snafu::ResultExt;

use crate::client::{ConfigParseSnafu, Result};
use crate::parameters::Credentials;
use crate::ServiceBuilder;

fn default_connect_timeout() -> u64 {
    60
}

fn default_read_timeout() -> u64 {
    60
}

fn default_pool_idle_timeout() -> u64 {
    5
}

/// Settings for one service, as loaded from TOML.
///
/// ```toml
/// base_url = "https://www.flymine.org/flymine/service"
/// read_timeout_secs = 120
///
/// [credentials]
/// token = "..."
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    pub base_url: String,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context(ConfigParseSnafu)
    }

    pub fn builder(&self) -> ServiceBuilder {
        let builder = ServiceBuilder::default()
            .with_base_url(self.base_url.clone())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_read_timeout(Duration::from_secs(self.read_timeout_secs))
            .with_pool_idle_timeout(Duration::from_secs(self.pool_idle_timeout_secs));

        match self.credentials.clone() {
            Some(credentials) => builder.with_credentials(credentials),
            None => builder,
        }
    }
}
