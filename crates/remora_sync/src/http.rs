//! HTTP adapter for the REST API.
//!
//! The adapter composes URLs and credential headers and encodes bodies.
//! The HTTP client itself is abstracted via [`HttpClient`] so any library
//! (reqwest, ureq, hyper) or an in-process stub can carry the bytes.

use crate::config::{ClientConfig, Credentials};
use crate::transport::{Method, Request, RequestBody, Response, Transport, TransportError};
use bytes::{BufMut, Bytes, BytesMut};
use remora_core::{FilePart, WireDocument};
use tracing::trace;
use uuid::Uuid;

/// Header carrying the application id.
pub const APP_ID_HEADER: &str = "X-ECHO-APP-ID";
/// Header carrying the application key.
pub const APP_KEY_HEADER: &str = "X-ECHO-APP-KEY";
/// Header carrying the member access token.
pub const ACCESS_TOKEN_HEADER: &str = "X-ECHO-ACCESS-TOKEN";

/// Name of the multipart part holding the JSON document.
pub const JSON_PART_NAME: &str = "data";

/// A fully composed HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL, including the query string.
    pub url: String,
    /// Header name / value pairs.
    pub headers: Vec<(String, String)>,
    /// Encoded body; empty for bodiless requests.
    pub body: Bytes,
}

impl HttpRequest {
    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a request. Any HTTP status is a response; only failures to
    /// obtain one are errors.
    fn send(&self, request: HttpRequest) -> Result<Response, String>;
}

/// [`Transport`] speaking the REST API over an [`HttpClient`].
pub struct HttpTransport<C: HttpClient> {
    credentials: Credentials,
    scheme: String,
    api_version: String,
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates an adapter with the default scheme and API version.
    pub fn new(credentials: Credentials, client: C) -> Self {
        Self::with_config(credentials, &ClientConfig::default(), client)
    }

    /// Creates an adapter using the scheme and API version of `config`.
    pub fn with_config(credentials: Credentials, config: &ClientConfig, client: C) -> Self {
        Self {
            credentials,
            scheme: config.scheme.clone(),
            api_version: config.api_version.clone(),
            client,
        }
    }

    /// The credentials in use.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// `{scheme}://{domain}/{path}/rest_api={version}/` plus the query.
    pub fn url_for(&self, request: &Request) -> String {
        let mut url = format!(
            "{}://{}/{}/rest_api={}/",
            self.scheme,
            self.credentials.domain,
            request.path.trim_matches('/'),
            self.api_version
        );
        for (i, (key, value)) in request.query.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(&urlencoding::encode(key));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    /// Composes the HTTP request for a REST request.
    pub fn compose(&self, request: &Request) -> HttpRequest {
        let mut headers = vec![
            (APP_ID_HEADER.to_string(), self.credentials.app_id.clone()),
            (APP_KEY_HEADER.to_string(), self.credentials.app_key.clone()),
        ];
        if !self.credentials.access_token.is_empty() {
            headers.push((
                ACCESS_TOKEN_HEADER.to_string(),
                self.credentials.access_token.clone(),
            ));
        }

        let (content_type, body) = match &request.body {
            RequestBody::None => ("application/json".to_string(), Bytes::new()),
            RequestBody::Json(document) => (
                "application/json".to_string(),
                Bytes::from(serde_json::Value::Object(document.clone()).to_string()),
            ),
            RequestBody::Multipart { document, files } => {
                let boundary = format!("remora-{}", Uuid::new_v4().simple());
                (
                    format!("multipart/form-data; boundary={boundary}"),
                    multipart_body(&boundary, document, files),
                )
            }
        };
        headers.push(("Content-Type".to_string(), content_type));

        HttpRequest {
            method: request.method,
            url: self.url_for(request),
            headers,
            body,
        }
    }
}

impl<C: HttpClient> Transport for HttpTransport<C> {
    fn request(&self, request: &Request) -> Result<Response, TransportError> {
        let http = self.compose(request);
        trace!(method = %http.method, url = %http.url, bytes = http.body.len(), "sending request");
        self.client.send(http).map_err(TransportError::new)
    }
}

/// Encodes a `multipart/form-data` body: the JSON document first, then one
/// part per file.
fn multipart_body(boundary: &str, document: &WireDocument, files: &[FilePart]) -> Bytes {
    let mut out = BytesMut::new();

    out.put_slice(format!("--{boundary}\r\n").as_bytes());
    out.put_slice(
        format!("Content-Disposition: form-data; name=\"{JSON_PART_NAME}\"\r\n").as_bytes(),
    );
    out.put_slice(b"Content-Type: application/json\r\n\r\n");
    out.put_slice(serde_json::Value::Object(document.clone()).to_string().as_bytes());
    out.put_slice(b"\r\n");

    for part in files {
        let file_name = part.file.file_name().unwrap_or("file");
        let content_type = part
            .file
            .content_type()
            .unwrap_or("application/octet-stream");
        out.put_slice(format!("--{boundary}\r\n").as_bytes());
        out.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                part.name,
                file_name.replace('"', "%22")
            )
            .as_bytes(),
        );
        out.put_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        if let Some(bytes) = part.file.local_bytes() {
            out.put_slice(bytes);
        }
        out.put_slice(b"\r\n");
    }

    out.put_slice(format!("--{boundary}--\r\n").as_bytes());
    out.freeze()
}
