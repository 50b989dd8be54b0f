//! Host adapters
//!
//! Thin translation between the host's event shapes and the engines'
//! inputs. The shapes mirror what serverless gateways and queue services
//! deliver (camelCase JSON, base64-flagged bodies, attribute maps); none
//! of this is part of the core dispatch contract.

pub mod http;
pub mod queue;
pub mod socket;

use thiserror::Error;

/// Event translation failure
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("invalid request path '{0}'")]
    InvalidPath(String),

    #[error("invalid header '{name}'")]
    InvalidHeader { name: String },

    #[error("invalid base64 body: {0}")]
    InvalidBody(#[from] base64::DecodeError),
}
