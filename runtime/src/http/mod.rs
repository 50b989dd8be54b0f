//! HTTP request/response model
//!
//! The engine consumes abstract requests produced by host adapters and
//! emits responses for the host to serialise onto the wire. The vocabulary
//! types (method, status, headers) come from the `http` crate; no listener
//! is bound here.

pub mod engine;
mod respond;

use std::collections::HashMap;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode, Uri};

pub use engine::HttpEngine;
pub use respond::coerce_response;

/// An inbound HTTP request, decoupled from any server framework
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Request path, without query string
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, if present
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Primary `type/subtype` token of the Content-Type header, lowercased
    /// and stripped of parameters
    pub fn content_type(&self) -> Option<String> {
        let value = self.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        let primary = value.split(';').next()?.trim();
        if primary.is_empty() {
            None
        } else {
            Some(primary.to_ascii_lowercase())
        }
    }

    /// Parse the Cookie header into a name → value map
    pub fn cookies(&self) -> HashMap<String, String> {
        let mut cookies = HashMap::new();
        if let Some(header) = self.headers.get(http::header::COOKIE) {
            if let Ok(raw) = header.to_str() {
                for pair in raw.split(';') {
                    if let Some((name, value)) = pair.split_once('=') {
                        cookies.insert(name.trim().to_string(), value.trim().to_string());
                    }
                }
            }
        }
        cookies
    }
}

/// An outbound HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// 200 response with a `text/plain; charset=utf-8` body
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK)
            .with_header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .with_body(body.into())
    }

    /// 200 response with an `application/json` body
    pub fn json(value: &serde_json::Value) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        Self::new(StatusCode::OK)
            .with_header(CONTENT_TYPE, "application/json")
            .with_body(body)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: http::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
