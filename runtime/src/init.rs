//! Runtime startup
//!
//! Builds the manifest from the registered modules, wires the collaborator
//! implementations, runs the warmup hook inside an ambient scope, and
//! hands back the engines. Manifest and configuration errors are fatal
//! here; the process must not serve with an invalid route table.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, RuntimeConfig};
use crate::connections::{ConnectionStore, SocketTransport};
use crate::context::{self, ContextError, RequestContext};
use crate::errors::{HandlerError, ManifestError};
use crate::http::HttpEngine;
use crate::manifest::Services;
use crate::module::ModuleRegistry;
use crate::queue::{QueueBackend, QueueDispatcher};
use crate::socket::SocketEngine;
use crate::state::RuntimeState;

/// Startup failure
#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("warmup hook failed: {0}")]
    Warmup(#[source] HandlerError),
}

/// A started runtime: the manifest is frozen and the engines are live
#[derive(Clone, Debug)]
pub struct Runtime {
    state: Arc<RuntimeState>,
}

impl Runtime {
    /// Start with in-memory collaborators (local mode)
    pub async fn start(
        config: RuntimeConfig,
        registry: ModuleRegistry,
    ) -> Result<Self, StartError> {
        config.validate()?;
        let services = Services::build(&registry, config.http_base_url.clone())?;
        let state = Arc::new(RuntimeState::local(services, config));
        Self::finish(state, &registry).await
    }

    /// Start with the embedder's collaborators
    pub async fn start_with(
        config: RuntimeConfig,
        registry: ModuleRegistry,
        queue: Arc<dyn QueueBackend>,
        connections: Arc<dyn ConnectionStore>,
        transport: Arc<dyn SocketTransport>,
    ) -> Result<Self, StartError> {
        config.validate()?;
        let services = Services::build(&registry, config.http_base_url.clone())?;
        let state = Arc::new(RuntimeState::new(
            services,
            config,
            queue,
            connections,
            transport,
        ));
        Self::finish(state, &registry).await
    }

    async fn finish(state: Arc<RuntimeState>, registry: &ModuleRegistry) -> Result<Self, StartError> {
        if let Some(warmup) = registry.warmup_hook() {
            info!("running warmup hook");
            let ambient = Arc::new(RequestContext::new(state.clone()));
            let hook = warmup.clone();
            context::scope(ambient, async move { hook().await })
                .await?
                .map_err(StartError::Warmup)?;
        }
        info!(local = state.queue.is_local(), "runtime started");
        Ok(Self { state })
    }

    pub fn http(&self) -> HttpEngine {
        HttpEngine::new(self.state.clone())
    }

    pub fn sockets(&self) -> SocketEngine {
        SocketEngine::new(self.state.clone())
    }

    pub fn queues(&self) -> QueueDispatcher {
        QueueDispatcher::new(self.state.clone())
    }

    pub fn state(&self) -> Arc<RuntimeState> {
        self.state.clone()
    }
}
