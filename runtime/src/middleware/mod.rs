//! Middleware chain
//!
//! A middleware set carries the eight named hooks a module or a
//! `_middleware` file may provide. The effective chain for a module is the
//! merge of every ancestor directory's `_middleware` set, nearest ancestor
//! winning, with the module's own exports overriding all of them.

use std::sync::Arc;

use crate::errors::DispatchError;
use crate::http::{HttpRequest, HttpResponse};
use crate::module::{BoxFuture, HandlerFailure, Payload, SocketMeta, User};

/// Authenticate the request; `Ok(None)` pins an anonymous principal
pub type AuthenticateFn = Arc<
    dyn Fn(
            HttpRequest,
            std::collections::HashMap<String, String>,
        ) -> BoxFuture<Result<Option<User>, HandlerFailure>>
        + Send
        + Sync,
>;

/// Observes the request before authentication; a `Response` failure
/// short-circuits the pipeline
pub type OnRequestFn =
    Arc<dyn Fn(HttpRequest) -> BoxFuture<Result<(), HandlerFailure>> + Send + Sync>;

/// Observes the response; a `Response` failure replaces it
pub type OnResponseFn =
    Arc<dyn Fn(HttpRequest, HttpResponse) -> BoxFuture<Result<(), HandlerFailure>> + Send + Sync>;

/// Invoked exactly once for any non-response error
pub type OnErrorFn =
    Arc<dyn Fn(Arc<DispatchError>, HttpRequest) -> BoxFuture<()> + Send + Sync>;

/// Fired on a user's first accepted connect / last disconnect
pub type PresenceFn = Arc<dyn Fn(String) -> BoxFuture<()> + Send + Sync>;

/// Observes each inbound socket message
pub type OnMessageReceivedFn =
    Arc<dyn Fn(Payload, SocketMeta) -> BoxFuture<()> + Send + Sync>;

/// Observes each outbound socket send, with the target connection ids
pub type OnMessageSentFn =
    Arc<dyn Fn(Payload, Vec<String>) -> BoxFuture<()> + Send + Sync>;

/// The full named-hook set a `_middleware` registration or module may carry
#[derive(Clone, Default)]
pub struct Middleware {
    pub authenticate: Option<AuthenticateFn>,
    pub on_request: Option<OnRequestFn>,
    pub on_response: Option<OnResponseFn>,
    pub on_error: Option<OnErrorFn>,
    pub on_online: Option<PresenceFn>,
    pub on_offline: Option<PresenceFn>,
    pub on_message_received: Option<OnMessageReceivedFn>,
    pub on_message_sent: Option<OnMessageSentFn>,
}

impl Middleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authenticate(mut self, f: AuthenticateFn) -> Self {
        self.authenticate = Some(f);
        self
    }

    pub fn on_request(mut self, f: OnRequestFn) -> Self {
        self.on_request = Some(f);
        self
    }

    pub fn on_response(mut self, f: OnResponseFn) -> Self {
        self.on_response = Some(f);
        self
    }

    pub fn on_error(mut self, f: OnErrorFn) -> Self {
        self.on_error = Some(f);
        self
    }

    pub fn on_online(mut self, f: PresenceFn) -> Self {
        self.on_online = Some(f);
        self
    }

    pub fn on_offline(mut self, f: PresenceFn) -> Self {
        self.on_offline = Some(f);
        self
    }

    pub fn on_message_received(mut self, f: OnMessageReceivedFn) -> Self {
        self.on_message_received = Some(f);
        self
    }

    pub fn on_message_sent(mut self, f: OnMessageSentFn) -> Self {
        self.on_message_sent = Some(f);
        self
    }

    /// Layer `self` over `base`: hooks set here win, unset hooks fall
    /// through to the base chain
    pub fn merge_over(&self, base: Middleware) -> Middleware {
        Middleware {
            authenticate: self.authenticate.clone().or(base.authenticate),
            on_request: self.on_request.clone().or(base.on_request),
            on_response: self.on_response.clone().or(base.on_response),
            on_error: self.on_error.clone().or(base.on_error),
            on_online: self.on_online.clone().or(base.on_online),
            on_offline: self.on_offline.clone().or(base.on_offline),
            on_message_received: self.on_message_received.clone().or(base.on_message_received),
            on_message_sent: self.on_message_sent.clone().or(base.on_message_sent),
        }
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = Vec::new();
        if self.authenticate.is_some() {
            set.push("authenticate");
        }
        if self.on_request.is_some() {
            set.push("on_request");
        }
        if self.on_response.is_some() {
            set.push("on_response");
        }
        if self.on_error.is_some() {
            set.push("on_error");
        }
        if self.on_online.is_some() {
            set.push("on_online");
        }
        if self.on_offline.is_some() {
            set.push("on_offline");
        }
        if self.on_message_received.is_some() {
            set.push("on_message_received");
        }
        if self.on_message_sent.is_some() {
            set.push("on_message_sent");
        }
        f.debug_tuple("Middleware").field(&set).finish()
    }
}

/// Ancestor directories of a source path, root first: for
/// `api/posts/[id].rs` this is `["", "api", "api/posts"]`
pub fn ancestor_dirs(source: &str) -> Vec<String> {
    let mut dirs = vec![String::new()];
    let mut prefix = String::new();
    let mut parts = source.split('/').peekable();
    while let Some(part) = parts.next() {
        // The final component is the file itself
        if parts.peek().is_none() {
            break;
        }
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        dirs.push(prefix.clone());
    }
    dirs
}
