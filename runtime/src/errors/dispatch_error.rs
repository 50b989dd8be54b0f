//! Per-event dispatch failure classification
//!
//! One variant per kind in the error taxonomy. The engines consult the
//! predicates here instead of re-deriving policy at each call site: which
//! HTTP status a kind maps to, whether the module's error middleware runs,
//! and whether the failure is logged with its source chain.

use http::{Method, StatusCode};
use thiserror::Error;

use super::HandlerError;
use crate::context::ContextError;

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Classified failure for a single dispatched event
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No route matched the request path
    #[error("no route matches '{path}'")]
    RouteNotFound { path: String },

    /// Queue message arrived for a queue with no registered module
    #[error("no module registered for queue '{name}'")]
    QueueNotFound { name: String },

    /// Route matched but does not accept the method
    #[error("method {method} not allowed for '{path}'")]
    MethodNotAllowed { method: Method, path: String },

    /// Request body media type is outside the route's accept set
    #[error("unsupported media type '{content_type}'")]
    UnsupportedMediaType { content_type: String },

    /// Authenticate middleware misbehaved (user without an id)
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// Deadline elapsed before the handler produced a result
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Handler or middleware returned a non-response error
    #[error("handler error: {0}")]
    Handler(#[source] HandlerError),

    /// Ambient context misuse (nested entry, double user assignment, ...)
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl DispatchError {
    /// Wrap a user-code error
    pub fn handler(error: impl Into<HandlerError>) -> Self {
        Self::Handler(error.into())
    }

    /// HTTP status this kind maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::QueueNotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Timeout { .. } | Self::Handler(_) | Self::Context(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the deadline elapsed
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the module's error middleware is invoked for this kind
    pub fn invokes_on_error(&self) -> bool {
        matches!(self, Self::Handler(_) | Self::Context(_))
    }

    /// Whether this kind is logged with its error chain (4xx traffic
    /// outcomes are not)
    pub fn logs_error(&self) -> bool {
        !matches!(
            self,
            Self::RouteNotFound { .. }
                | Self::MethodNotAllowed { .. }
                | Self::UnsupportedMediaType { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = DispatchError::RouteNotFound {
            path: "/missing".to_string(),
        };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(!err.logs_error());
        assert!(!err.invokes_on_error());

        let err = DispatchError::MethodNotAllowed {
            method: Method::PUT,
            path: "/posts".to_string(),
        };
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);

        let err = DispatchError::Timeout { seconds: 30 };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_timeout());
        assert!(!err.invokes_on_error());
    }

    #[test]
    fn test_handler_errors_reach_error_middleware() {
        let err = DispatchError::handler(std::io::Error::other("db down"));
        assert!(err.invokes_on_error());
        assert!(err.logs_error());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
