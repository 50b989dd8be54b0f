//! Manifest validation errors
//!
//! Every variant names the source file that produced it, so a failed startup
//! points straight at the module that needs fixing. Manifest errors are
//! fatal: the process refuses to serve with an invalid route table.

use thiserror::Error;

/// Result type for manifest construction
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Startup-time validation failure, scoped to one source file
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Path segment is neither a literal nor a parameter
    #[error("{filename}: invalid path segment '{segment}'")]
    InvalidSegment { filename: String, segment: String },

    /// Two parameters in one template share a name
    #[error("{filename}: duplicate parameter name ':{name}'")]
    DuplicateParameter { filename: String, name: String },

    /// A catch-all parameter appears before the final segment
    #[error("{filename}: catch-all parameter ':{name}*' must be the last segment")]
    CatchAllNotLast { filename: String, name: String },

    /// Template translated to an empty path
    #[error("{filename}: file does not map to a route path")]
    EmptyPath { filename: String },

    /// Two files translate to the same route shape
    #[error("{filename}: route '{path}' collides with '{other}' (shape '{shape}')")]
    DuplicateRoute {
        filename: String,
        path: String,
        other: String,
        shape: String,
    },

    /// Queue name violates the naming grammar
    #[error("{filename}: invalid queue name '{name}' (alphanumeric, '-', '_', optional '.fifo')")]
    InvalidQueueName { filename: String, name: String },

    /// Queue name exceeds the length limit
    #[error("{filename}: queue name '{name}' exceeds {max} characters")]
    QueueNameTooLong {
        filename: String,
        name: String,
        max: usize,
    },

    /// Two queue modules declare the same logical name
    #[error("{filename}: queue '{name}' already declared by '{other}'")]
    DuplicateQueue {
        filename: String,
        name: String,
        other: String,
    },

    /// A FIFO queue exposes an HTTP path without a `:group` parameter
    #[error("{filename}: FIFO queue URL '{url}' must include a ':group' parameter")]
    FifoUrlMissingGroup { filename: String, url: String },

    /// Registered source path is reserved (leading underscore segment)
    #[error("{filename}: underscore-prefixed files are reserved and cannot be routes")]
    ReservedFilename { filename: String },
}

impl ManifestError {
    /// The source file this error is scoped to
    pub fn filename(&self) -> &str {
        match self {
            Self::InvalidSegment { filename, .. }
            | Self::DuplicateParameter { filename, .. }
            | Self::CatchAllNotLast { filename, .. }
            | Self::EmptyPath { filename }
            | Self::DuplicateRoute { filename, .. }
            | Self::InvalidQueueName { filename, .. }
            | Self::QueueNameTooLong { filename, .. }
            | Self::DuplicateQueue { filename, .. }
            | Self::FifoUrlMissingGroup { filename, .. }
            | Self::ReservedFilename { filename } => filename,
        }
    }
}
