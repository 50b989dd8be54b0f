//! Error types for the dispatch runtime
//!
//! Split by lifecycle: `ManifestError` is fatal at startup and always names
//! the offending source file; `DispatchError` classifies per-event failures
//! and carries the response-status / logging policy for each kind.

pub mod dispatch_error;
pub mod manifest_error;

pub use dispatch_error::{DispatchError, DispatchResult};
pub use manifest_error::{ManifestError, ManifestResult};

/// Boxed error produced by user handler code.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
