//! Socket event shape
//!
//! Connect, Message and Disconnect events over an opaque connection id.
//! Connect carries the upgrade headers so the engine can synthesise a
//! request for `authenticate`; Message bodies may be base64-flagged.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};

use super::AdapterError;
use crate::http::HttpRequest;
use crate::socket::SocketEngine;

/// A socket event as delivered by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum SocketEvent {
    #[serde(rename_all = "camelCase")]
    Connect {
        connection_id: String,
        #[serde(default)]
        request_id: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    #[serde(rename_all = "camelCase")]
    Message {
        connection_id: String,
        request_id: String,
        body: String,
        #[serde(default)]
        is_base64_encoded: bool,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect { connection_id: String },
}

/// Run one socket event through the engine; the status is the host's
/// response (204 accepts an upgrade, anything else denies it)
pub async fn dispatch(engine: &SocketEngine, event: SocketEvent) -> Result<StatusCode, AdapterError> {
    match event {
        SocketEvent::Connect {
            connection_id,
            headers,
            ..
        } => {
            let request = upgrade_request(&headers)?;
            Ok(engine.connect(&connection_id, request).await)
        }
        SocketEvent::Message {
            connection_id,
            request_id,
            body,
            is_base64_encoded,
        } => {
            let data = if is_base64_encoded {
                Bytes::from(BASE64.decode(body)?)
            } else {
                Bytes::from(body)
            };
            Ok(engine.message(&connection_id, &request_id, data).await)
        }
        SocketEvent::Disconnect { connection_id } => {
            Ok(engine.disconnect(&connection_id).await)
        }
    }
}

/// Synthesise the request `authenticate` sees from the upgrade headers
fn upgrade_request(headers: &HashMap<String, String>) -> Result<HttpRequest, AdapterError> {
    let mut request = HttpRequest::new(Method::GET, Uri::from_static("/"));
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| AdapterError::InvalidHeader { name: name.clone() })?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| AdapterError::InvalidHeader { name: name.clone() })?;
        request.headers.insert(header, value);
    }
    Ok(request)
}
