//! Ambient request-scoped context
//!
//! Each event (HTTP request, socket event, queue message) gets exactly one
//! context, installed as a task-local before any user code runs and torn
//! down when the event completes. User code reaches the runtime through it
//! without threading a handle through every signature: enqueue jobs, send
//! socket frames, look up connections, read the authenticated user.
//!
//! The scope is strict: opening a second context inside a live one is a
//! programmer error, access outside any scope fails closed, and `escape`
//! clears the context for a callback (simulated enqueue delivers the
//! message under a fresh scope of its own).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::warn;

use crate::errors::{DispatchError, DispatchResult};
use crate::middleware::OnMessageSentFn;
use crate::module::{Payload, User};
use crate::path::{BoundUrl, UrlBuilder};
use crate::queue::JobRequest;
use crate::state::RuntimeState;

tokio::task_local! {
    static CURRENT: Option<Arc<RequestContext>>;
}

/// Ambient context misuse
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// Access outside any event scope
    #[error("Runtime not available")]
    NotAvailable,

    /// A second context opened while one is live
    #[error("request context already entered for this event")]
    Nested,

    /// The user cell only transitions once
    #[error("authenticated user already set for this request")]
    UserAlreadySet,
}

/// The per-event context value
pub struct RequestContext {
    state: Arc<RuntimeState>,
    connection_id: Option<String>,
    user: OnceLock<Option<User>>,
    on_message_sent: Option<OnMessageSentFn>,
}

impl RequestContext {
    /// Context for an HTTP request or queue message
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self {
            state,
            connection_id: None,
            user: OnceLock::new(),
            on_message_sent: None,
        }
    }

    /// Context for a socket event, carrying the connection id
    pub fn for_connection(state: Arc<RuntimeState>, connection_id: impl Into<String>) -> Self {
        Self {
            state,
            connection_id: Some(connection_id.into()),
            user: OnceLock::new(),
            on_message_sent: None,
        }
    }

    /// Attach the observability hook fired after each outbound send
    pub fn with_on_message_sent(mut self, hook: Option<OnMessageSentFn>) -> Self {
        self.on_message_sent = hook;
        self
    }

    /// The connection this event arrived on (socket events only)
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// The authenticated user, if one has been pinned
    pub fn user(&self) -> Option<User> {
        self.user.get().cloned().flatten()
    }

    /// Pin the authenticated principal. The cell transitions exactly once,
    /// `None → Some(user)` or `None → None`; a second assignment fails.
    pub fn set_user(&self, user: Option<User>) -> Result<(), ContextError> {
        self.user.set(user).map_err(|_| ContextError::UserAlreadySet)
    }

    /// The outbound URL table
    pub fn urls(&self) -> &UrlBuilder {
        self.state.services.url_builder()
    }

    /// The public socket base URL, if one is configured
    pub fn socket_base_url(&self) -> Option<&url::Url> {
        self.state.config.ws_base_url.as_ref()
    }

    /// URL builder bound to a registered module's own route
    pub fn self_url(&self, source: &str) -> Option<BoundUrl> {
        self.state.services.self_url(source)
    }

    /// Push a job onto a queue; resolves to the message id
    pub async fn queue_job(&self, mut job: JobRequest) -> DispatchResult<String> {
        let queue = self
            .state
            .services
            .queue(&job.queue_name)
            .ok_or_else(|| DispatchError::QueueNotFound {
                name: job.queue_name.clone(),
            })?;
        if queue.fifo && job.group_id.is_none() {
            return Err(DispatchError::handler(format!(
                "queue '{}' is FIFO and requires a group id",
                queue.name
            )));
        }
        if job.user_id.is_none() {
            job.user_id = self.user().map(|user| user.id);
        }
        self.state
            .queue
            .enqueue(job)
            .await
            .map_err(DispatchError::Handler)
    }

    /// Send a socket frame to every live connection of the given users
    pub async fn send_socket_message(
        &self,
        data: Payload,
        to_users: &[String],
    ) -> DispatchResult<Vec<String>> {
        let connections = self
            .state
            .connections
            .connections_for(to_users)
            .await
            .map_err(DispatchError::Handler)?;
        for connection in &connections {
            self.state
                .transport
                .send(connection, data.clone())
                .await
                .map_err(DispatchError::Handler)?;
        }
        if let Some(hook) = &self.on_message_sent {
            hook(data, connections.clone()).await;
        }
        Ok(connections)
    }

    /// Close a socket connection
    pub async fn close_socket(&self, connection_id: &str) -> DispatchResult<()> {
        self.state
            .transport
            .close(connection_id)
            .await
            .map_err(DispatchError::Handler)
    }

    /// Live connection ids for the given users
    pub async fn connections_for(&self, user_ids: &[String]) -> DispatchResult<Vec<String>> {
        self.state
            .connections
            .connections_for(user_ids)
            .await
            .map_err(DispatchError::Handler)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("connection_id", &self.connection_id)
            .field("user", &self.user())
            .finish()
    }
}

/// Run a future with the given context installed. Fails if a context is
/// already live on this task.
pub async fn scope<F>(context: Arc<RequestContext>, fut: F) -> Result<F::Output, ContextError>
where
    F: Future,
{
    let already_entered = CURRENT
        .try_with(|current| current.is_some())
        .unwrap_or(false);
    if already_entered {
        warn!("rejected nested request context");
        return Err(ContextError::Nested);
    }
    Ok(CURRENT.scope(Some(context), fut).await)
}

/// Run a future with the ambient context cleared. Used by simulated
/// enqueue so delivery can open a fresh scope of its own.
pub async fn escape<F>(fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(None, fut).await
}

/// The live context, failing closed outside any event scope
pub fn current() -> Result<Arc<RequestContext>, ContextError> {
    CURRENT
        .try_with(|current| current.clone())
        .ok()
        .flatten()
        .ok_or(ContextError::NotAvailable)
}

/// The authenticated user of the live context
pub fn current_user() -> Result<Option<User>, ContextError> {
    Ok(current()?.user())
}

/// Push a job through the live context; resolves to the message id
pub async fn queue_job(job: JobRequest) -> DispatchResult<String> {
    current()?.queue_job(job).await
}

/// Send a socket frame through the live context
pub async fn send_socket_message(
    data: Payload,
    to_users: &[String],
) -> DispatchResult<Vec<String>> {
    current()?.send_socket_message(data, to_users).await
}

/// Close a connection through the live context
pub async fn close_socket(connection_id: &str) -> DispatchResult<()> {
    current()?.close_socket(connection_id).await
}

/// Connection lookup through the live context
pub async fn connections_for(user_ids: &[String]) -> DispatchResult<Vec<String>> {
    current()?.connections_for(user_ids).await
}
