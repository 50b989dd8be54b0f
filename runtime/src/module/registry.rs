//! Module registry
//!
//! Central registration point for a project's handler modules. Hosts build
//! the registry once at startup, the manifest loader validates it into the
//! immutable `Services` table, and the engines resolve handlers out of it.
//! Registration order is preserved so validation errors are deterministic.

use tracing::debug;

use super::{QueueModule, RouteModule, SocketModule, WarmupFn};
use crate::middleware::{ancestor_dirs, Middleware};

/// All modules a project registers
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    routes: Vec<RouteModule>,
    queues: Vec<QueueModule>,
    socket: Option<SocketModule>,
    middleware: Vec<(String, Middleware)>,
    warmup: Option<WarmupFn>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an HTTP endpoint module
    pub fn route(mut self, module: RouteModule) -> Self {
        debug!(source = %module.source, "registered route module");
        self.routes.push(module);
        self
    }

    /// Register a queue module
    pub fn queue(mut self, module: QueueModule) -> Self {
        debug!(source = %module.source, "registered queue module");
        self.queues.push(module);
        self
    }

    /// Register the socket module (last registration wins)
    pub fn socket(mut self, module: SocketModule) -> Self {
        debug!(source = %module.source, "registered socket module");
        self.socket = Some(module);
        self
    }

    /// Register a `_middleware` set for a directory (`""` for the project
    /// root, `"api"`, `"api/posts"`, ...)
    pub fn middleware(mut self, dir: impl Into<String>, middleware: Middleware) -> Self {
        let dir = dir.into();
        debug!(dir = %dir, "registered directory middleware");
        self.middleware.retain(|(existing, _)| *existing != dir);
        self.middleware.push((dir, middleware));
        self
    }

    /// Register the startup warmup hook
    pub fn warmup(mut self, hook: WarmupFn) -> Self {
        self.warmup = Some(hook);
        self
    }

    pub fn routes(&self) -> &[RouteModule] {
        &self.routes
    }

    pub fn queues(&self) -> &[QueueModule] {
        &self.queues
    }

    pub fn socket_module(&self) -> Option<&SocketModule> {
        self.socket.as_ref()
    }

    pub fn warmup_hook(&self) -> Option<&WarmupFn> {
        self.warmup.as_ref()
    }

    fn middleware_for_dir(&self, dir: &str) -> Option<&Middleware> {
        self.middleware
            .iter()
            .find(|(existing, _)| existing == dir)
            .map(|(_, middleware)| middleware)
    }

    /// The effective middleware chain for a module: ancestor `_middleware`
    /// sets merged root-outward (nearest directory wins), with the
    /// module's own hooks overriding the lot
    pub fn middleware_chain(&self, source: &str, own: &Middleware) -> Middleware {
        let mut chain = Middleware::default();
        for dir in ancestor_dirs(source) {
            if let Some(middleware) = self.middleware_for_dir(&dir) {
                chain = middleware.merge_over(chain);
            }
        }
        own.merge_over(chain)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("routes", &self.routes.len())
            .field("queues", &self.queues.len())
            .field("socket", &self.socket.is_some())
            .field(
                "middleware_dirs",
                &self.middleware.iter().map(|(d, _)| d).collect::<Vec<_>>(),
            )
            .finish()
    }
}
