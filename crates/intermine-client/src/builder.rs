use std::sync::Arc;
use std::time;

use snafu::ResultExt;

use crate::client::{ClientBuildSnafu, MissingBaseUrlSnafu, Result, ServiceConnection};
use crate::parameters::{Credentials, Parameters};
use crate::registry::ModelRegistry;
use crate::transport::{HttpTransport, Transport};

pub struct ServiceBuilder {
    base_url: Option<String>,
    credentials: Option<Credentials>,
    registry: Option<Arc<ModelRegistry>>,
    transport: Option<Arc<dyn Transport>>,

    connect_timeout: time::Duration,
    read_timeout: time::Duration,
    pool_idle_timeout: time::Duration,
}

impl ServiceBuilder {
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_token<S: Into<String>>(mut self, token: S) -> Self {
        self.credentials = Some(Credentials::Token {
            token: token.into(),
        });
        self
    }

    pub fn with_basic_auth<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.credentials = Some(Credentials::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Shares a model cache with other connections.
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the HTTP transport. Credentials and the connect timeout are then up to the
    /// given transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bounds connecting and waiting for the response headers.
    pub fn with_connect_timeout<T: Into<time::Duration>>(mut self, timeout: T) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    /// Bounds the wait for each chunk of a result body.
    pub fn with_read_timeout<T: Into<time::Duration>>(mut self, timeout: T) -> Self {
        self.read_timeout = timeout.into();
        self
    }

    pub fn with_pool_idle_timeout<T: Into<time::Duration>>(mut self, timeout: T) -> Self {
        self.pool_idle_timeout = timeout.into();
        self
    }

    pub fn build(self) -> Result<ServiceConnection> {
        let base_url = self.base_url.ok_or_else(|| MissingBaseUrlSnafu.build())?;

        let params = Parameters {
            base_url,
            credentials: self.credentials,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            pool_idle_timeout: self.pool_idle_timeout,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&params).context(ClientBuildSnafu)?),
        };
        let registry = self.registry.unwrap_or_default();

        Ok(ServiceConnection::new_with_params(params, transport, registry))
    }
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            credentials: None,
            registry: None,
            transport: None,
            connect_timeout: time::Duration::from_secs(60),
            read_timeout: time::Duration::from_secs(60),
            pool_idle_timeout: time::Duration::from_secs(5),
        }
    }
}
