use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;

use bytes::{Bytes, BytesMut};

use futures::{Stream, StreamExt};

use reqwest::header;

use snafu::Snafu;

use crate::parameters::{Credentials, Parameters};

/// The body of a response, as it arrives.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("request failed: {}", message))]
    RequestError { message: String },

    #[snafu(display("timed out waiting for a response"))]
    TimeoutError,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    /// Form fields for a POST without a body, query string parameters otherwise.
    pub params: Vec<(String, String)>,
    /// Plain text sent as the body of a POST.
    pub body: Option<String>,
}

pub struct Response {
    pub status: u16,
    pub body: BodyStream,
}

impl Response {
    /// Reads the whole body, waiting at most `timeout` for each chunk.
    ///
    /// With a `limit`, reading stops once that many bytes are in and the rest is dropped.
    pub async fn read_body(mut self, timeout: Duration, limit: Option<usize>) -> io::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = tokio::time::timeout(timeout, self.body.next())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timed out reading response body"))?
        {
            buf.extend_from_slice(&chunk?);
            if let Some(limit) = limit {
                if buf.len() >= limit {
                    buf.truncate(limit);
                    break;
                }
            }
        }
        Ok(buf.freeze())
    }
}

/// Sends requests to a service. The connection issues every request through this.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the response headers are in. The body is streamed afterwards.
    async fn send(&self, request: Request) -> Result<Response, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    first_byte_timeout: Duration,
}

impl HttpTransport {
    pub(crate) fn new(params: &Parameters) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(params.pool_idle_timeout)
            .connect_timeout(params.connect_timeout)
            .user_agent(concat!("intermine-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            credentials: params.credentials.clone(),
            first_byte_timeout: params.connect_timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(level = "debug", skip(self, request), fields(url = %request.url))]
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let builder = match (request.method, request.body) {
            (Method::Get, _) => self.client.get(&request.url).query(&request.params),
            (Method::Post, Some(body)) => self
                .client
                .post(&request.url)
                .query(&request.params)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(body),
            (Method::Post, None) => self.client.post(&request.url).form(&request.params),
            (Method::Delete, _) => self.client.delete(&request.url).query(&request.params),
        };

        let builder = match &self.credentials {
            Some(Credentials::Token { token }) => {
                builder.header(header::AUTHORIZATION, format!("Token {}", token))
            }
            Some(Credentials::Basic { username, password }) => {
                builder.basic_auth(username, Some(password))
            }
            None => builder,
        };

        let response = tokio::time::timeout(self.first_byte_timeout, builder.send())
            .await
            .map_err(|_| TransportError::TimeoutError)?
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::TimeoutError
                } else {
                    TransportError::RequestError {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status().as_u16();
        tracing::debug!(status, "got response headers");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

        Ok(Response {
            status,
            body: Box::pin(body),
        })
    }
}
