//! HTTP event shape
//!
//! Translates a gateway HTTP event into an engine request, and an engine
//! response back into the gateway's result shape. Binary bodies cross the
//! boundary base64-encoded.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Uri};
use serde::{Deserialize, Serialize};

use super::AdapterError;
use crate::http::{HttpRequest, HttpResponse};

/// An HTTP request as delivered by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEvent {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// The response shape handed back to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResult {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

/// Translate a host event into an engine request
pub fn into_request(event: HttpEvent) -> Result<HttpRequest, AdapterError> {
    let method = Method::from_bytes(event.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| AdapterError::InvalidMethod(event.method.clone()))?;

    let path_and_query = match &event.query {
        Some(query) if !query.is_empty() => format!("{}?{}", event.path, query),
        _ => event.path.clone(),
    };
    let uri: Uri = path_and_query
        .parse()
        .map_err(|_| AdapterError::InvalidPath(path_and_query.clone()))?;

    let mut request = HttpRequest::new(method, uri);
    for (name, value) in &event.headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AdapterError::InvalidHeader { name: name.clone() })?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| AdapterError::InvalidHeader { name: name.clone() })?;
        request.headers.insert(header, value);
    }

    request.body = match event.body {
        Some(body) if event.is_base64_encoded => Bytes::from(BASE64.decode(body)?),
        Some(body) => Bytes::from(body),
        None => Bytes::new(),
    };
    Ok(request)
}

/// Translate an engine response into the host's result shape
pub fn from_response(response: HttpResponse) -> HttpResult {
    let headers = response
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    match String::from_utf8(response.body.to_vec()) {
        Ok(body) => HttpResult {
            status_code: response.status.as_u16(),
            headers,
            body,
            is_base64_encoded: false,
        },
        Err(err) => HttpResult {
            status_code: response.status.as_u16(),
            headers,
            body: BASE64.encode(err.as_bytes()),
            is_base64_encoded: true,
        },
    }
}
