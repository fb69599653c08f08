use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use intermine_model::{Model, ModelError};
use intermine_query::{templates_from_json, Query, QueryBuilder, QueryError, Template};

use serde::Deserialize;

use snafu::{ResultExt, Snafu};

use tokio::sync::OnceCell;

use crate::builder::ServiceBuilder;
use crate::config::ServiceConfig;
use crate::lists::ListCache;
use crate::parameters::{Credentials, Parameters};
use crate::registry::ModelRegistry;
use crate::results::ResultIterator;
use crate::transport::{Method, Request, Response, Transport, TransportError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("authentication failed: {}", message))]
    AuthenticationError { message: String },

    #[snafu(display("service unavailable: {}", message))]
    ServiceUnavailableError { message: String },

    #[snafu(display("request quota exceeded: {}", message))]
    QuotaExceededError { message: String },

    #[snafu(display("malformed response: {}", message))]
    MalformedResponseError { message: String },

    #[snafu(display("server returned an error ({}): {}", status, message))]
    ServerReturnedError { status: u16, message: String },

    #[snafu(display("there is no template called '{}'", name))]
    UnknownTemplateError { name: String },

    #[snafu(display("there is no list called '{}'", name))]
    UnknownListError { name: String },

    #[snafu(display("missing base url"))]
    MissingBaseUrl,

    #[snafu(display("failed to build http client: {}", source))]
    ClientBuildError { source: reqwest::Error },

    #[snafu(display("failed to parse configuration: {}", source))]
    ConfigParseError { source: toml::de::Error },

    #[snafu(display("{}", source))]
    QueryError { source: QueryError },

    #[snafu(display("{}", source))]
    ModelError { source: ModelError },
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<QueryError> for ClientError {
    fn from(source: QueryError) -> Self {
        ClientError::QueryError { source }
    }
}

impl From<ModelError> for ClientError {
    fn from(source: ModelError) -> Self {
        ClientError::ModelError { source }
    }
}

/// Error bodies are only read this far.
const MAX_ERROR_BODY: usize = 64 * 1024;

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Builds the error for a non-success status.
///
/// The message is the `error` field of a JSON body if there is one, or the body text.
fn status_error(status: u16, body: &[u8]) -> ClientError {
    let message = match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(e) => e.error,
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                format!("HTTP {}", status)
            } else {
                text
            }
        }
    };

    match status {
        401 | 403 => ClientError::AuthenticationError { message },
        429 => ClientError::QuotaExceededError { message },
        500..=599 => ClientError::ServiceUnavailableError { message },
        _ => ClientError::ServerReturnedError { status, message },
    }
}

fn transport_error(e: TransportError) -> ClientError {
    ClientError::ServiceUnavailableError {
        message: e.to_string(),
    }
}

/// Which slice of the results to fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub start: usize,
    /// At most this many rows. All remaining rows if unset.
    pub size: Option<usize>,
}

impl Page {
    pub fn new(start: usize, size: usize) -> Self {
        Self {
            start,
            size: Some(size),
        }
    }
}

/// A connection to one InterMine service.
///
/// Creating a connection does not touch the network. The model, version, release and
/// templates are each fetched on first use and kept for the life of the connection.
pub struct ServiceConnection {
    base_url: String,
    transport: Arc<dyn Transport>,
    registry: Arc<ModelRegistry>,
    read_timeout: Duration,

    version: OnceCell<u32>,
    release: OnceCell<String>,
    templates: OnceCell<Arc<BTreeMap<String, Template>>>,
    pub(crate) list_cache: ListCache,
}

impl ServiceConnection {
    /// Creates a connection with default settings. `timeout` bounds connecting, waiting for
    /// the response headers, and each read of a result body.
    pub fn connect<S: Into<String>>(
        base_url: S,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let builder = ServiceBuilder::default()
            .with_base_url(base_url)
            .with_connect_timeout(timeout)
            .with_read_timeout(timeout);
        let builder = match credentials {
            Some(credentials) => builder.with_credentials(credentials),
            None => builder,
        };
        builder.build()
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.builder().build()
    }

    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    pub(crate) fn new_with_params(
        params: Parameters,
        transport: Arc<dyn Transport>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            base_url: params.base_url.trim_end_matches('/').to_string(),
            transport,
            registry,
            read_timeout: params.read_timeout,
            version: OnceCell::new(),
            release: OnceCell::new(),
            templates: OnceCell::new(),
            list_cache: ListCache::default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(String, String)>,
        body: Option<String>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(?method, %url, "sending request");

        let response = self
            .transport
            .send(Request {
                method,
                url: url.clone(),
                params,
                body,
            })
            .await
            .map_err(|e| {
                tracing::warn!(%url, "request failed: {}", e);
                transport_error(e)
            })?;

        if (200..300).contains(&response.status) {
            return Ok(response);
        }

        let status = response.status;
        let body = response
            .read_body(self.read_timeout, Some(MAX_ERROR_BODY))
            .await
            .unwrap_or_default();
        let err = status_error(status, &body);
        tracing::warn!(%url, status, "service returned an error: {}", err);
        Err(err)
    }

    pub(crate) async fn fetch(&self, endpoint: &str, params: Vec<(String, String)>) -> Result<Bytes> {
        self.exchange(Method::Get, endpoint, params, None).await
    }

    /// Sends a request and reads the whole response body.
    pub(crate) async fn exchange(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(String, String)>,
        body: Option<String>,
    ) -> Result<Bytes> {
        let response = self.request(method, endpoint, params, body).await?;
        response
            .read_body(self.read_timeout, None)
            .await
            .map_err(|e| ClientError::ServiceUnavailableError {
                message: format!("failed to read response: {}", e),
            })
    }

    async fn fetch_text(&self, endpoint: &str) -> Result<String> {
        let body = self.fetch(endpoint, Vec::new()).await?;
        String::from_utf8(body.to_vec())
            .map(|s| s.trim().to_string())
            .map_err(|e| ClientError::MalformedResponseError {
                message: e.to_string(),
            })
    }

    /// The service's data model. Fetched once, then served from the registry.
    pub async fn fetch_model(&self) -> Result<Arc<Model>> {
        self.registry
            .get_or_fetch(&self.base_url, || async {
                let body = self
                    .fetch("/model", vec![(String::from("format"), String::from("json"))])
                    .await?;
                let model = Model::from_json(&body).context(ModelSnafu)?;
                tracing::debug!(model = model.name(), "fetched model");
                Ok::<_, ClientError>(Arc::new(model))
            })
            .await
    }

    /// Starts a query against this service's model.
    pub async fn new_query(&self) -> Result<QueryBuilder> {
        Ok(QueryBuilder::new(self.fetch_model().await?))
    }

    /// The version of the service's API.
    pub async fn version(&self) -> Result<u32> {
        self.version
            .get_or_try_init(|| async {
                let text = self.fetch_text("/version").await?;
                text.parse::<u32>()
                    .map_err(|_| ClientError::MalformedResponseError {
                        message: format!("'{}' is not a version number", text),
                    })
            })
            .await
            .map(|v| *v)
    }

    /// The release of the data the service holds.
    pub async fn release(&self) -> Result<String> {
        self.release
            .get_or_try_init(|| self.fetch_text("/version/release"))
            .await
            .map(String::clone)
    }

    /// Every template the service offers, by name.
    pub async fn templates(&self) -> Result<Arc<BTreeMap<String, Template>>> {
        self.templates
            .get_or_try_init(|| async {
                let model = self.fetch_model().await?;
                let body = self
                    .fetch("/templates", vec![(String::from("format"), String::from("json"))])
                    .await?;
                let templates = templates_from_json(&body, &model).context(QuerySnafu)?;
                Ok::<_, ClientError>(Arc::new(templates))
            })
            .await
            .map(Arc::clone)
    }

    pub async fn template(&self, name: &str) -> Result<Template> {
        let templates = self.templates().await?;
        templates
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::UnknownTemplateError {
                name: String::from(name),
            })
    }

    /// Runs a query and returns its rows.
    ///
    /// Resolves once the service has answered. Rows are then read as they are pulled.
    pub async fn execute(&self, query: &Query) -> Result<ResultIterator> {
        self.execute_page(query, Page::default()).await
    }

    pub async fn execute_page(&self, query: &Query, page: Page) -> Result<ResultIterator> {
        let mut params = vec![
            (String::from("query"), query.to_xml().context(QuerySnafu)?),
            (String::from("format"), String::from("tab")),
        ];
        if page.start > 0 {
            params.push((String::from("start"), page.start.to_string()));
        }
        if let Some(size) = page.size {
            params.push((String::from("size"), size.to_string()));
        }

        let response = self.request(Method::Post, "/query/results", params, None).await?;
        Ok(ResultIterator::new(
            response.body,
            query.views().to_vec(),
            self.read_timeout,
            page.size,
        ))
    }

    /// Runs a template with the current values of its editable constraints.
    pub async fn execute_template(&self, template: &Template) -> Result<ResultIterator> {
        let mut params = template.to_params();
        params.push((String::from("format"), String::from("tab")));

        let response = self.request(Method::Post, "/template/results", params, None).await?;
        Ok(ResultIterator::new(
            response.body,
            template.query().views().to_vec(),
            self.read_timeout,
            None,
        ))
    }

    /// Closes the connection, dropping the cached model for its base URL.
    pub fn close(self) {
        self.registry.invalidate(&self.base_url);
        tracing::debug!(base_url = %self.base_url, "closed connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(401, b""),
            ClientError::AuthenticationError { .. }
        ));
        assert!(matches!(
            status_error(403, b"forbidden"),
            ClientError::AuthenticationError { .. }
        ));
        assert!(matches!(
            status_error(429, b""),
            ClientError::QuotaExceededError { .. }
        ));
        assert!(matches!(
            status_error(503, b""),
            ClientError::ServiceUnavailableError { .. }
        ));
        assert!(matches!(
            status_error(400, br#"{"error": "bad query", "statusCode": 400}"#),
            ClientError::ServerReturnedError { status: 400, ref message } if message == "bad query"
        ));
    }

    #[test]
    fn error_message_falls_back_to_text() {
        let e = status_error(404, b"  no such page \n");
        assert_eq!(e.to_string(), "server returned an error (404): no such page");

        let e = status_error(418, b"");
        assert_eq!(e.to_string(), "server returned an error (418): HTTP 418");
    }

    #[test]
    fn page() {
        assert_eq!(Page::default(), Page { start: 0, size: None });
        assert_eq!(Page::new(10, 5).size, Some(5));
    }
}
