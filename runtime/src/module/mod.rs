//! Handler module contract
//!
//! User projects declare their endpoints as registered modules: a route
//! module per HTTP endpoint, a queue module per logical queue, at most one
//! socket module, and `_middleware` registrations per directory. Each
//! registration carries its project-relative source path (the same
//! `api/**` / `queues/*` layout the manifest translates into routes).
//!
//! Handlers return a tagged value instead of a framework response type;
//! the engine owns coercion. Failures are a sum of "respond with this"
//! and "this is an error" so short-circuiting with a response is ordinary
//! control flow, not an exception.

pub mod registry;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::HandlerError;
use crate::http::{HttpRequest, HttpResponse};
use crate::middleware::Middleware;

pub use registry::ModuleRegistry;

/// Boxed future returned by handler closures
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The authenticated principal pinned to a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    /// Additional claims carried alongside the id
    #[serde(flatten, default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            claims: serde_json::Map::new(),
        }
    }
}

/// Event payload as decoded for queue and socket handlers
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Raw bytes of the payload, serialising JSON values
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Json(value) => Bytes::from(serde_json::to_vec(&value).unwrap_or_default()),
            Payload::Text(text) => Bytes::from(text),
            Payload::Binary(bytes) => bytes,
        }
    }
}

/// How a module wants its payload decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    #[default]
    Json,
    Text,
    Binary,
}

/// Tagged handler result; coercion into a response is a total function
/// over these variants
#[derive(Debug, Clone)]
pub enum HandlerValue {
    /// A fully-formed response, passed through with headers preserved
    Response(HttpResponse),
    /// Raw bytes with an explicit media type
    Raw { data: Bytes, content_type: String },
    /// Plain text (`text/plain; charset=utf-8`)
    Text(String),
    /// JSON-serialisable value (`application/json`)
    Json(serde_json::Value),
    /// Nothing: coerces to 204 with a logged warning
    Empty,
}

/// Why a handler or middleware did not produce a value
#[derive(Debug)]
pub enum HandlerFailure {
    /// Respond with this instead; treated as a completed non-200 result
    Response(HttpResponse),
    /// A genuine error; classified and reported through error middleware
    Error(HandlerError),
}

impl HandlerFailure {
    pub fn error(err: impl Into<HandlerError>) -> Self {
        Self::Error(err.into())
    }
}

impl From<HttpResponse> for HandlerFailure {
    fn from(response: HttpResponse) -> Self {
        Self::Response(response)
    }
}

/// Metadata handed to route handlers alongside the request
#[derive(Debug, Clone)]
pub struct HandlerMeta {
    pub cookies: HashMap<String, String>,
    pub params: HashMap<String, String>,
    pub signal: CancellationToken,
    pub user: Option<User>,
}

/// Metadata handed to socket message handlers
#[derive(Debug, Clone)]
pub struct SocketMeta {
    pub connection: String,
    pub request_id: String,
    pub user: Option<User>,
    pub signal: CancellationToken,
}

/// Metadata handed to queue handlers
#[derive(Debug, Clone)]
pub struct QueueMeta {
    pub message_id: String,
    pub group_id: Option<String>,
    pub params: HashMap<String, String>,
    pub queue_name: String,
    pub received_count: u32,
    pub sent_at: Option<u64>,
    pub sequence_number: Option<u64>,
    pub user: Option<User>,
    pub signal: CancellationToken,
}

/// Route handler: request + metadata → tagged value
pub type RouteHandlerFn = Arc<
    dyn Fn(HttpRequest, HandlerMeta) -> BoxFuture<Result<HandlerValue, HandlerFailure>>
        + Send
        + Sync,
>;

/// Socket message handler
pub type SocketHandlerFn =
    Arc<dyn Fn(Payload, SocketMeta) -> BoxFuture<Result<(), HandlerFailure>> + Send + Sync>;

/// Queue message handler
pub type QueueHandlerFn =
    Arc<dyn Fn(Payload, QueueMeta) -> BoxFuture<Result<(), HandlerFailure>> + Send + Sync>;

/// Queue-module error hook, invoked before a message is reported failed
pub type QueueErrorFn =
    Arc<dyn Fn(Arc<crate::errors::DispatchError>, QueueMeta) -> BoxFuture<()> + Send + Sync>;

/// Startup warmup hook
pub type WarmupFn = Arc<dyn Fn() -> BoxFuture<Result<(), HandlerError>> + Send + Sync>;

/// Cache policy for 200 responses
#[derive(Clone, Default)]
pub enum CachePolicy {
    /// No Cache-Control added
    #[default]
    Off,
    /// Fixed `max-age` in seconds
    Seconds(u64),
    /// Derived from the handler value; `None` adds nothing
    FromResult(Arc<dyn Fn(&HandlerValue) -> Option<u64> + Send + Sync>),
}

impl std::fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "Off"),
            Self::Seconds(secs) => write!(f, "Seconds({secs})"),
            Self::FromResult(_) => write!(f, "FromResult(..)"),
        }
    }
}

/// ETag policy for 200 responses
#[derive(Clone)]
pub enum EtagPolicy {
    /// MD5 of the body (the default)
    Enabled,
    /// Never add an ETag
    Disabled,
    /// A fixed validator string
    Fixed(String),
    /// Derived from the handler value; `None` adds nothing
    FromResult(Arc<dyn Fn(&HandlerValue) -> Option<String> + Send + Sync>),
}

impl Default for EtagPolicy {
    fn default() -> Self {
        Self::Enabled
    }
}

impl std::fmt::Debug for EtagPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled => write!(f, "Enabled"),
            Self::Disabled => write!(f, "Disabled"),
            Self::Fixed(tag) => write!(f, "Fixed({tag})"),
            Self::FromResult(_) => write!(f, "FromResult(..)"),
        }
    }
}

/// Per-route configuration, all fields optional
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// Accepted methods; `None` derives the set from registered handlers
    pub methods: Option<Vec<Method>>,
    /// Accepted content types (`type/subtype` or `type/*`); `None` accepts all
    pub accepts: Option<Vec<String>>,
    /// Handler timeout in seconds, clamped to the configured maximum
    pub timeout: Option<u64>,
    /// Whether CORS headers and preflight handling apply
    pub cors: bool,
    pub cache: CachePolicy,
    pub etag: EtagPolicy,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            methods: None,
            accepts: None,
            timeout: None,
            cors: true,
            cache: CachePolicy::Off,
            etag: EtagPolicy::Enabled,
        }
    }
}

/// Per-queue configuration
#[derive(Debug, Clone, Default)]
pub struct QueueConfig {
    /// Optional HTTP path projecting this queue into the route table
    /// (POST only)
    pub url: Option<String>,
    /// Handler timeout in seconds, clamped to 1..=500 (default 30)
    pub timeout: Option<u64>,
    /// Payload decoding; `None` tries JSON and falls back to text
    pub payload_type: Option<PayloadKind>,
    /// Accepted content types for the web-triggered enqueue route
    pub accepts: Option<Vec<String>>,
}

/// Socket module configuration
#[derive(Debug, Clone, Default)]
pub struct SocketConfig {
    pub payload_type: PayloadKind,
    /// Message handler timeout in seconds (default 10)
    pub timeout: Option<u64>,
}

/// One HTTP endpoint registration
#[derive(Clone)]
pub struct RouteModule {
    pub source: String,
    handlers: HashMap<Method, RouteHandlerFn>,
    fallback: Option<RouteHandlerFn>,
    pub config: RouteConfig,
    pub middleware: Middleware,
}

impl RouteModule {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            handlers: HashMap::new(),
            fallback: None,
            config: RouteConfig::default(),
            middleware: Middleware::default(),
        }
    }

    /// Register a handler for one verb
    pub fn on(mut self, method: Method, handler: RouteHandlerFn) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    pub fn get(self, handler: RouteHandlerFn) -> Self {
        self.on(Method::GET, handler)
    }

    pub fn post(self, handler: RouteHandlerFn) -> Self {
        self.on(Method::POST, handler)
    }

    pub fn put(self, handler: RouteHandlerFn) -> Self {
        self.on(Method::PUT, handler)
    }

    /// DELETE handler; named after the `del` convention of hosts where
    /// `delete` is reserved
    pub fn del(self, handler: RouteHandlerFn) -> Self {
        self.on(Method::DELETE, handler)
    }

    pub fn patch(self, handler: RouteHandlerFn) -> Self {
        self.on(Method::PATCH, handler)
    }

    /// Register a handler serving every verb not covered by a named one
    pub fn any(mut self, handler: RouteHandlerFn) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn with_config(mut self, config: RouteConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware = middleware;
        self
    }

    /// Handler for a verb, falling back to the `any` handler. HEAD is
    /// served by the GET handler.
    pub fn handler(&self, method: &Method) -> Option<&RouteHandlerFn> {
        let effective = if *method == Method::HEAD {
            &Method::GET
        } else {
            method
        };
        self.handlers.get(effective).or(self.fallback.as_ref())
    }

    /// The accepted method set: explicit config wins, otherwise the verbs
    /// with registered handlers; a module with only an `any` handler
    /// accepts every method.
    pub fn accepted_methods(&self) -> Option<Vec<Method>> {
        if let Some(methods) = &self.config.methods {
            return Some(methods.clone());
        }
        if self.fallback.is_some() {
            return None;
        }
        let mut methods: Vec<Method> = self.handlers.keys().cloned().collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Some(methods)
    }
}

impl std::fmt::Debug for RouteModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteModule")
            .field("source", &self.source)
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

/// One queue registration
#[derive(Clone)]
pub struct QueueModule {
    pub source: String,
    pub handler: QueueHandlerFn,
    pub config: QueueConfig,
    pub on_error: Option<QueueErrorFn>,
}

impl QueueModule {
    pub fn new(source: impl Into<String>, handler: QueueHandlerFn) -> Self {
        Self {
            source: source.into(),
            handler,
            config: QueueConfig::default(),
            on_error: None,
        }
    }

    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_on_error(mut self, on_error: QueueErrorFn) -> Self {
        self.on_error = Some(on_error);
        self
    }
}

impl std::fmt::Debug for QueueModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueModule")
            .field("source", &self.source)
            .field("config", &self.config)
            .finish()
    }
}

/// The socket module registration (at most one per project)
#[derive(Clone)]
pub struct SocketModule {
    pub source: String,
    pub handler: SocketHandlerFn,
    pub config: SocketConfig,
    pub middleware: Middleware,
}

impl SocketModule {
    pub fn new(source: impl Into<String>, handler: SocketHandlerFn) -> Self {
        Self {
            source: source.into(),
            handler,
            config: SocketConfig::default(),
            middleware: Middleware::default(),
        }
    }

    pub fn with_config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middleware = middleware;
        self
    }
}

impl std::fmt::Debug for SocketModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketModule")
            .field("source", &self.source)
            .field("config", &self.config)
            .finish()
    }
}

/// Convenience: box an async closure into a route handler
pub fn route_handler<F, Fut>(f: F) -> RouteHandlerFn
where
    F: Fn(HttpRequest, HandlerMeta) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerValue, HandlerFailure>> + Send + 'static,
{
    Arc::new(move |request, meta| Box::pin(f(request, meta)))
}

/// Convenience: box an async closure into a queue handler
pub fn queue_handler<F, Fut>(f: F) -> QueueHandlerFn
where
    F: Fn(Payload, QueueMeta) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerFailure>> + Send + 'static,
{
    Arc::new(move |payload, meta| Box::pin(f(payload, meta)))
}

/// Convenience: box an async closure into a socket handler
pub fn socket_handler<F, Fut>(f: F) -> SocketHandlerFn
where
    F: Fn(Payload, SocketMeta) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerFailure>> + Send + 'static,
{
    Arc::new(move |payload, meta| Box::pin(f(payload, meta)))
}
