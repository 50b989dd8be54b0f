pub mod config;
pub mod connections;
pub mod context;
pub mod errors;
pub mod host;
pub mod http;
pub mod init;
pub mod manifest;
pub mod middleware;
pub mod module;
pub mod path;
pub mod queue;
pub mod socket;
pub mod state;

// Re-export commonly used items for convenience
pub use config::RuntimeConfig;
pub use errors::{DispatchError, ManifestError};
pub use http::{HttpEngine, HttpRequest, HttpResponse};
pub use init::{Runtime, StartError};
pub use manifest::Services;
pub use module::{ModuleRegistry, QueueModule, RouteModule, SocketModule, User};
pub use queue::QueueDispatcher;
pub use socket::SocketEngine;
pub use state::RuntimeState;
