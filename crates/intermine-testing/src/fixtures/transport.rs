use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use bytes::Bytes;

use futures::StreamExt;

use intermine_client::{BodyStream, Method, Request, Response, Transport, TransportError};

use parking_lot::Mutex;

#[derive(Clone, Debug)]
enum Failure {
    Unreachable,
    Timeout,
}

/// A canned response.
#[derive(Clone, Debug)]
pub struct Reply {
    status: u16,
    chunks: Vec<Bytes>,
    stall: bool,
    failure: Option<Failure>,
}

impl Reply {
    pub fn ok<S: Into<String>>(body: S) -> Self {
        Self::status(200, body)
    }

    pub fn status<S: Into<String>>(status: u16, body: S) -> Self {
        Self {
            status,
            chunks: vec![Bytes::from(body.into())],
            stall: false,
            failure: None,
        }
    }

    /// A 200 whose body arrives in the given pieces.
    pub fn chunked<S: Into<String>>(chunks: Vec<S>) -> Self {
        Self {
            status: 200,
            chunks: chunks.into_iter().map(|c| Bytes::from(c.into())).collect(),
            stall: false,
            failure: None,
        }
    }

    /// The body never ends after its last chunk.
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    /// The service can't be reached.
    pub fn unreachable() -> Self {
        Self {
            failure: Some(Failure::Unreachable),
            ..Self::status(0, "")
        }
    }

    /// The service never answers.
    pub fn timeout() -> Self {
        Self {
            failure: Some(Failure::Timeout),
            ..Self::status(0, "")
        }
    }
}

/// Decrements the open handle count when the body it lives in is dropped.
struct HandleGuard(Arc<AtomicUsize>);

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type Route = (Option<Method>, String);

/// A transport serving canned replies by endpoint, and recording every request.
///
/// Keeps count of response bodies that are still alive, so tests can check that bodies
/// get released.
pub struct MockTransport {
    base_url: String,
    routes: Mutex<HashMap<Route, Reply>>,
    calls: Mutex<Vec<Request>>,
    open: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: String::from(base_url.trim_end_matches('/')),
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serves `reply` for `endpoint` (e.g. `/query/results`), replacing any earlier one.
    pub fn reply(&self, endpoint: &str, reply: Reply) {
        self.routes.lock().insert((None, String::from(endpoint)), reply);
    }

    /// Serves `reply` for `method` requests to `endpoint`, ahead of any reply for all methods.
    pub fn reply_to(&self, method: Method, endpoint: &str, reply: Reply) {
        self.routes
            .lock()
            .insert((Some(method), String::from(endpoint)), reply);
    }

    /// Requests made with `method` to `endpoint`, oldest first.
    pub fn calls_to(&self, method: Method, endpoint: &str) -> Vec<Request> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.method == method && self.endpoint_of(&r.url) == endpoint)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|r| self.endpoint_of(&r.url) == endpoint)
            .count()
    }

    /// The most recent request made to `endpoint`.
    pub fn last_call(&self, endpoint: &str) -> Option<Request> {
        self.calls
            .lock()
            .iter()
            .rev()
            .find(|r| self.endpoint_of(&r.url) == endpoint)
            .cloned()
    }

    /// Response bodies handed out and not dropped yet.
    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn route(&self, method: Method, endpoint: &str) -> Option<Reply> {
        let routes = self.routes.lock();
        let specific = (Some(method), String::from(endpoint));
        let any = (None, String::from(endpoint));
        routes.get(&specific).or_else(|| routes.get(&any)).cloned()
    }

    fn endpoint_of<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(self.base_url.as_str()).unwrap_or(url)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let endpoint = String::from(self.endpoint_of(&request.url));
        let method = request.method;
        tracing::debug!(?method, %endpoint, "mock request");
        self.calls.lock().push(request);

        let reply = self
            .route(method, &endpoint)
            .unwrap_or_else(|| Reply::status(404, r#"{"error": "no such resource", "statusCode": 404}"#));

        match reply.failure {
            Some(Failure::Unreachable) => {
                return Err(TransportError::RequestError {
                    message: String::from("connection refused"),
                })
            }
            Some(Failure::Timeout) => return Err(TransportError::TimeoutError),
            None => {}
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        let guard = HandleGuard(self.open.clone());

        let chunks = futures::stream::iter(reply.chunks.into_iter().map(Ok::<_, io::Error>));
        let body: BodyStream = if reply.stall {
            Box::pin(chunks.chain(futures::stream::pending()).map(move |chunk| {
                let _held = &guard;
                chunk
            }))
        } else {
            Box::pin(chunks.map(move |chunk| {
                let _held = &guard;
                chunk
            }))
        };

        Ok(Response {
            status: reply.status,
            body,
        })
    }
}
