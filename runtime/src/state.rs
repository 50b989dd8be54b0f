//! Shared runtime state
//!
//! One `RuntimeState` per process, threaded into the engines as an `Arc`.
//! Collaborator implementations default to the in-memory ones, which is
//! what local mode uses; embedders swap in their own store/backend/
//! transport at startup.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::connections::{ConnectionStore, MemoryConnectionStore, MemorySocketTransport, SocketTransport};
use crate::manifest::Services;
use crate::queue::{MemoryQueueBackend, QueueBackend};

/// Everything the engines share for the lifetime of the process
pub struct RuntimeState {
    pub services: Services,
    pub config: RuntimeConfig,
    pub queue: Arc<dyn QueueBackend>,
    pub connections: Arc<dyn ConnectionStore>,
    pub transport: Arc<dyn SocketTransport>,
}

impl RuntimeState {
    /// State with in-memory collaborators (local mode)
    pub fn local(services: Services, config: RuntimeConfig) -> Self {
        Self {
            services,
            config,
            queue: Arc::new(MemoryQueueBackend::new()),
            connections: Arc::new(MemoryConnectionStore::new()),
            transport: Arc::new(MemorySocketTransport::new()),
        }
    }

    /// State with explicit collaborators
    pub fn new(
        services: Services,
        config: RuntimeConfig,
        queue: Arc<dyn QueueBackend>,
        connections: Arc<dyn ConnectionStore>,
        transport: Arc<dyn SocketTransport>,
    ) -> Self {
        Self {
            services,
            config,
            queue,
            connections,
            transport,
        }
    }
}

impl std::fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeState")
            .field("routes", &self.services.routes().len())
            .field("local_queue", &self.queue.is_local())
            .finish()
    }
}
