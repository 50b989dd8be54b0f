//! WebSocket event engine
//!
//! Three event types over an opaque connection id. Connect authenticates
//! the synthesised upgrade request and records the connection → user
//! binding; Message decodes and dispatches to the socket module's handler
//! under a deadline; Disconnect unwinds the binding and reports presence.
//! The wire itself belongs to the host; this engine only decides statuses.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config;
use crate::context::{self, RequestContext};
use crate::http::HttpRequest;
use crate::module::{HandlerFailure, Payload, PayloadKind, SocketMeta, SocketModule, User};
use crate::state::RuntimeState;

/// Dispatches socket events against the registered socket module
#[derive(Clone)]
pub struct SocketEngine {
    state: Arc<RuntimeState>,
}

impl SocketEngine {
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }

    fn module(&self) -> Option<SocketModule> {
        self.state.services.socket().cloned()
    }

    /// A new connection, carrying the synthesised upgrade request.
    /// 204 accepts the upgrade; anything else denies it.
    pub async fn connect(&self, connection_id: &str, request: HttpRequest) -> StatusCode {
        let Some(module) = self.module() else {
            return StatusCode::NOT_FOUND;
        };

        let ambient = Arc::new(
            RequestContext::for_connection(self.state.clone(), connection_id)
                .with_on_message_sent(module.middleware.on_message_sent.clone()),
        );
        let state = self.state.clone();
        let connection = connection_id.to_string();

        let outcome = context::scope(ambient.clone(), async move {
            let Some(authenticate) = &module.middleware.authenticate else {
                return StatusCode::NO_CONTENT;
            };
            match authenticate(request.clone(), request.cookies()).await {
                Ok(Some(user)) => {
                    if user.id.is_empty() {
                        error!(
                            connection = %connection,
                            "socket authenticate returned a user without an id"
                        );
                        return StatusCode::FORBIDDEN;
                    }
                    let _ = ambient.set_user(Some(user.clone()));
                    match state.connections.bind(&connection, &user.id).await {
                        Ok(first) => {
                            if first {
                                if let Some(on_online) = &module.middleware.on_online {
                                    on_online(user.id.clone()).await;
                                }
                            }
                            StatusCode::NO_CONTENT
                        }
                        Err(err) => {
                            error!(connection = %connection, error = %err, "connection bind failed");
                            StatusCode::INTERNAL_SERVER_ERROR
                        }
                    }
                }
                Ok(None) => StatusCode::NO_CONTENT,
                Err(HandlerFailure::Response(response)) => response.status,
                Err(HandlerFailure::Error(err)) => {
                    error!(connection = %connection, error = %err, "socket authenticate failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        })
        .await;

        outcome.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// An inbound frame for a live connection
    pub async fn message(
        &self,
        connection_id: &str,
        request_id: &str,
        data: Bytes,
    ) -> StatusCode {
        let Some(module) = self.module() else {
            return StatusCode::NOT_FOUND;
        };

        let payload = match decode_payload(module.config.payload_type, data) {
            Ok(payload) => payload,
            Err(reason) => {
                error!(connection = %connection_id, reason = %reason, "undecodable socket message");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        };

        let user = match self.state.connections.resolve_user(connection_id).await {
            Ok(user_id) => user_id.map(User::new),
            Err(err) => {
                error!(connection = %connection_id, error = %err, "connection lookup failed");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        };

        let token = CancellationToken::new();
        let meta = SocketMeta {
            connection: connection_id.to_string(),
            request_id: request_id.to_string(),
            user: user.clone(),
            signal: token.clone(),
        };

        if let Some(hook) = &module.middleware.on_message_received {
            hook(payload.clone(), meta.clone()).await;
        }

        let ambient = Arc::new(
            RequestContext::for_connection(self.state.clone(), connection_id)
                .with_on_message_sent(module.middleware.on_message_sent.clone()),
        );
        let _ = ambient.set_user(user);

        let timeout = module
            .config
            .timeout
            .unwrap_or(config::DEFAULT_SOCKET_TIMEOUT_SECS)
            .clamp(1, config::MAX_SOCKET_TIMEOUT_SECS);
        let handler = module.handler.clone();
        // Run on a task: a timed-out handler is abandoned, not terminated
        let scoped = tokio::spawn(context::scope(ambient, async move {
            handler(payload, meta).await
        }));

        let joined = tokio::select! {
            joined = scoped => joined,
            _ = tokio::time::sleep(Duration::from_secs(timeout)) => {
                token.cancel();
                warn!(connection = %connection_id, timeout_secs = timeout, "socket handler timed out");
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        };

        match joined {
            Ok(Ok(Ok(()))) => StatusCode::OK,
            Ok(Ok(Err(HandlerFailure::Response(response)))) => response.status,
            Ok(Ok(Err(HandlerFailure::Error(err)))) => {
                error!(connection = %connection_id, error = %err, "socket handler failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Ok(Err(context_error)) => {
                error!(connection = %connection_id, error = %context_error, "socket context error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Err(join_error) => {
                error!(connection = %connection_id, error = %join_error, "socket handler panicked");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// A connection closed; unwind its binding and report presence
    pub async fn disconnect(&self, connection_id: &str) -> StatusCode {
        let module = self.module();

        match self.state.connections.unbind(connection_id).await {
            Ok(unbound) => {
                debug!(
                    connection = %connection_id,
                    user = ?unbound.user_id,
                    went_offline = unbound.went_offline,
                    "connection removed"
                );
                if unbound.went_offline {
                    if let (Some(user_id), Some(module)) = (unbound.user_id, &module) {
                        if let Some(on_offline) = &module.middleware.on_offline {
                            on_offline(user_id).await;
                        }
                    }
                }
                StatusCode::OK
            }
            Err(err) => {
                error!(connection = %connection_id, error = %err, "connection unbind failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Interpret raw frame bytes per the module's configured payload type
fn decode_payload(kind: PayloadKind, data: Bytes) -> Result<Payload, String> {
    match kind {
        PayloadKind::Json => serde_json::from_slice(&data)
            .map(Payload::Json)
            .map_err(|err| format!("invalid JSON: {err}")),
        PayloadKind::Text => String::from_utf8(data.to_vec())
            .map(Payload::Text)
            .map_err(|err| format!("invalid UTF-8: {err}")),
        PayloadKind::Binary => Ok(Payload::Binary(data)),
    }
}
