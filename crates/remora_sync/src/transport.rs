//! Transport abstraction between the scheduler and the network.

use bytes::Bytes;
use parking_lot::Mutex;
use remora_core::{FilePart, WireDocument};
use serde_json::Value as Json;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read a resource or a collection.
    Get,
    /// Create a resource.
    Post,
    /// Update a resource.
    Put,
    /// Delete a resource.
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    None,
    /// A JSON object.
    Json(WireDocument),
    /// A JSON object plus file payloads.
    Multipart {
        /// The JSON part.
        document: WireDocument,
        /// File parts, named after their field paths.
        files: Vec<FilePart>,
    },
}

impl RequestBody {
    /// The JSON document, whatever the encoding.
    pub fn document(&self) -> Option<&WireDocument> {
        match self {
            RequestBody::None => None,
            RequestBody::Json(document) | RequestBody::Multipart { document, .. } => {
                Some(document)
            }
        }
    }

    /// Returns true for a multipart body.
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart { .. })
    }
}

/// A request against the REST API.
///
/// `path` is relative to the API root, without a leading slash
/// (`inst42/members/x1`).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Resource path.
    pub path: String,
    /// Query parameters, already flattened to text.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
}

impl Request {
    /// Creates a bodiless request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::None,
        }
    }

    /// GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Adds flattened query parameters.
    #[must_use]
    pub fn with_query(mut self, params: &WireDocument) -> Self {
        self.query = flatten_query(params);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Looks up a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Renders top-level parameters as `key=value` pairs: strings verbatim,
/// other scalars as their JSON text, arrays and objects as compact JSON.
pub fn flatten_query(params: &WireDocument) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Bytes,
}

impl Response {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Creates a response with a JSON body.
    pub fn json(status: u16, body: &Json) -> Self {
        Self::new(status, body.to_string())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The request could not be completed at the network level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Sends requests to the REST API.
///
/// Implementations must be usable from several worker threads at once.
/// They perform no retries.
pub trait Transport: Send + Sync {
    /// Performs one request.
    fn request(&self, request: &Request) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).request(request)
    }
}

/// A transport that replays scripted responses, for tests.
///
/// Responses are consumed in order. When the script runs out, requests fail
/// with a transport error. Every request is recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<Response, TransportError>>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    /// Creates a mock with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: Response) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: Json) {
        self.push_response(Response::json(status, &body));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.script.lock().push_back(Err(TransportError::new(message)));
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

impl Transport for MockTransport {
    fn request(&self, request: &Request) -> Result<Response, TransportError> {
        self.requests.lock().push(request.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("no mock response scripted")))
    }
}
