//! Manifest: the immutable `Services` table
//!
//! Built once at startup from the module registry. Queues are validated
//! first, then routes, then queue-backed synthetic routes are injected, so
//! the dependency between the two tables stays one-directional. Any
//! violation aborts startup with a `ManifestError` naming the offending
//! source file.

pub mod loader;

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use tracing::info;
use url::Url;

use crate::config;
use crate::errors::{ManifestError, ManifestResult};
use crate::middleware::Middleware;
use crate::module::{
    CachePolicy, EtagPolicy, ModuleRegistry, QueueModule, RouteModule, SocketModule,
};
use crate::path::{BoundUrl, PathTemplate, UrlBuilder};

pub use loader::{queue_name_for_source, route_path_for_source};

/// What a matched route dispatches to
#[derive(Debug, Clone)]
pub enum RouteTarget {
    /// A registered route module
    Module(Arc<RouteModule>),
    /// A queue projected into the route table: POST enqueues
    Queue(Arc<Queue>),
}

/// One HTTP endpoint in the manifest
#[derive(Debug, Clone)]
pub struct Route {
    path: String,
    template: PathTemplate,
    methods: Option<Vec<Method>>,
    accepts: Option<Vec<String>>,
    pub timeout: u64,
    pub cors: bool,
    pub cache: CachePolicy,
    pub etag: EtagPolicy,
    pub filename: String,
    pub target: RouteTarget,
    pub middleware: Middleware,
}

impl Route {
    /// Canonical colon-form path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    /// Whether the route accepts the method; HEAD falls through to GET
    pub fn accepts_method(&self, method: &Method) -> bool {
        let Some(methods) = &self.methods else {
            return true;
        };
        if methods.contains(method) {
            return true;
        }
        *method == Method::HEAD && methods.contains(&Method::GET)
    }

    /// Whether the route accepts the content type (exact or `type/*`)
    pub fn accepts_content_type(&self, content_type: &str) -> bool {
        let Some(accepts) = &self.accepts else {
            return true;
        };
        accepts
            .iter()
            .any(|accept| media_type_matches(accept, content_type))
    }

    /// Value for `Access-Control-Allow-Methods`: the accepted set, or `*`
    pub fn allowed_methods_header(&self) -> String {
        match &self.methods {
            Some(methods) => methods
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", "),
            None => "*".to_string(),
        }
    }
}

fn media_type_matches(accept: &str, actual: &str) -> bool {
    let accept = accept.to_ascii_lowercase();
    if accept == "*/*" {
        return true;
    }
    if let Some(family) = accept.strip_suffix("/*") {
        return actual
            .split('/')
            .next()
            .is_some_and(|primary| primary == family);
    }
    accept == actual
}

/// One logical queue in the manifest
#[derive(Debug, Clone)]
pub struct Queue {
    pub name: String,
    pub fifo: bool,
    /// Canonical path of the web-triggered enqueue route, if bound
    pub path: Option<String>,
    /// Handler timeout in seconds, clamped to 1..=500
    pub timeout: u64,
    pub filename: String,
    pub module: QueueModule,
}

/// Immutable mapping of canonical path → route and logical name → queue
#[derive(Debug, Clone)]
pub struct Services {
    routes: Vec<Route>,
    queues: HashMap<String, Arc<Queue>>,
    socket: Option<SocketModule>,
    url_builder: UrlBuilder,
}

impl Services {
    /// Validate the registry into an immutable manifest
    pub fn build(registry: &ModuleRegistry, http_base: Option<Url>) -> ManifestResult<Self> {
        let url_builder = match http_base {
            Some(base) => UrlBuilder::with_base(base),
            None => UrlBuilder::new(),
        };

        // Queues first: routes may depend on queues, never the reverse
        let mut queues: HashMap<String, Arc<Queue>> = HashMap::new();
        for module in registry.queues() {
            let (name, fifo) = queue_name_for_source(&module.source)?;
            if let Some(existing) = queues.get(&name) {
                return Err(ManifestError::DuplicateQueue {
                    filename: module.source.clone(),
                    name,
                    other: existing.filename.clone(),
                });
            }
            let timeout = module
                .config
                .timeout
                .unwrap_or(config::DEFAULT_QUEUE_TIMEOUT_SECS)
                .clamp(1, config::MAX_QUEUE_TIMEOUT_SECS);
            let path = match &module.config.url {
                Some(url) => {
                    let template = PathTemplate::parse(url)
                        .map_err(|err| template_error(&module.source, err))?;
                    if fifo && !template.has_param("group") {
                        return Err(ManifestError::FifoUrlMissingGroup {
                            filename: module.source.clone(),
                            url: url.clone(),
                        });
                    }
                    Some(template.path().to_string())
                }
                None => None,
            };
            queues.insert(
                name.clone(),
                Arc::new(Queue {
                    name,
                    fifo,
                    path,
                    timeout,
                    filename: module.source.clone(),
                    module: module.clone(),
                }),
            );
        }

        // Routes, with shape-collision detection across the whole table
        let mut routes: Vec<Route> = Vec::new();
        let mut shapes: HashMap<String, String> = HashMap::new();
        for module in registry.routes() {
            let raw_path = route_path_for_source(&module.source)?;
            let template = PathTemplate::parse(&raw_path)
                .map_err(|err| template_error(&module.source, err))?;
            check_shape(&mut shapes, &template, &module.source)?;

            let timeout = module
                .config
                .timeout
                .unwrap_or(config::DEFAULT_HTTP_TIMEOUT_SECS)
                .clamp(1, config::MAX_HTTP_TIMEOUT_SECS);
            routes.push(Route {
                path: template.path().to_string(),
                methods: module.accepted_methods(),
                accepts: module.config.accepts.clone(),
                timeout,
                cors: module.config.cors,
                cache: module.config.cache.clone(),
                etag: module.config.etag.clone(),
                filename: module.source.clone(),
                middleware: registry.middleware_chain(&module.source, &module.middleware),
                target: RouteTarget::Module(Arc::new(module.clone())),
                template,
            });
        }

        // Queue-backed synthetic routes: POST-only, same collision rule
        let mut queue_names: Vec<&String> = queues.keys().collect();
        queue_names.sort();
        for name in queue_names {
            let queue = &queues[name];
            let Some(path) = &queue.path else { continue };
            let template = PathTemplate::parse(path)
                .map_err(|err| template_error(&queue.filename, err))?;
            check_shape(&mut shapes, &template, &queue.filename)?;
            routes.push(Route {
                path: template.path().to_string(),
                methods: Some(vec![Method::POST]),
                accepts: queue.module.config.accepts.clone(),
                timeout: config::DEFAULT_HTTP_TIMEOUT_SECS,
                cors: true,
                cache: CachePolicy::Off,
                etag: EtagPolicy::Disabled,
                filename: queue.filename.clone(),
                middleware: registry
                    .middleware_chain(&queue.filename, &Middleware::default()),
                target: RouteTarget::Queue(queue.clone()),
                template,
            });
        }

        // Literal segments outrank parameters, catch-alls match last
        routes.sort_by(|a, b| {
            let rank = |route: &Route| {
                let shape = route.template.shape();
                (
                    shape.contains(":*"),
                    route.template.param_names().len(),
                    route.path.clone(),
                )
            };
            rank(a).cmp(&rank(b))
        });

        let socket = registry.socket_module().map(|module| {
            let mut resolved = module.clone();
            resolved.middleware =
                registry.middleware_chain(&module.source, &module.middleware);
            resolved
        });

        info!(
            routes = routes.len(),
            queues = queues.len(),
            socket = socket.is_some(),
            "manifest built"
        );
        Ok(Self {
            routes,
            queues,
            socket,
            url_builder,
        })
    }

    /// Match a request path to a route and its captured parameters
    pub fn match_route(&self, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|route| route.template.matches(path).map(|params| (route, params)))
    }

    /// Route by canonical path
    pub fn route(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.path == path)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Queue by logical name
    pub fn queue(&self, name: &str) -> Option<&Arc<Queue>> {
        self.queues.get(name)
    }

    pub fn queues(&self) -> impl Iterator<Item = &Arc<Queue>> {
        self.queues.values()
    }

    /// The socket module with its effective middleware chain resolved
    pub fn socket(&self) -> Option<&SocketModule> {
        self.socket.as_ref()
    }

    /// The outbound URL builder (absolute if a base URL is configured)
    pub fn url_builder(&self) -> &UrlBuilder {
        &self.url_builder
    }

    /// URL builder bound to the route registered for a module source path
    /// (`url.self()` for registrations)
    pub fn self_url(&self, source: &str) -> Option<BoundUrl> {
        let raw_path = route_path_for_source(source).ok()?;
        let template = PathTemplate::parse(&raw_path).ok()?;
        let route = self.route(template.path())?;
        Some(self.url_builder.bind_template(route.template.clone()))
    }
}

fn template_error(filename: &str, err: crate::path::TemplateError) -> ManifestError {
    use crate::path::TemplateError;
    match err {
        TemplateError::InvalidSegment(segment) => ManifestError::InvalidSegment {
            filename: filename.to_string(),
            segment,
        },
        TemplateError::DuplicateParameter(name) => ManifestError::DuplicateParameter {
            filename: filename.to_string(),
            name,
        },
        TemplateError::CatchAllNotLast(name) => ManifestError::CatchAllNotLast {
            filename: filename.to_string(),
            name,
        },
    }
}

fn check_shape(
    shapes: &mut HashMap<String, String>,
    template: &PathTemplate,
    filename: &str,
) -> ManifestResult<()> {
    let shape = template.shape();
    if let Some(other) = shapes.get(&shape) {
        return Err(ManifestError::DuplicateRoute {
            filename: filename.to_string(),
            path: template.path().to_string(),
            other: other.clone(),
            shape,
        });
    }
    shapes.insert(shape, filename.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{
        queue_handler, route_handler, HandlerValue, QueueConfig, RouteConfig,
    };

    fn route_module(source: &str) -> RouteModule {
        RouteModule::new(source).get(route_handler(|_request, _meta| async {
            Ok(HandlerValue::Empty)
        }))
    }

    fn queue_module(source: &str) -> QueueModule {
        QueueModule::new(
            source,
            queue_handler(|_payload, _meta| async { Ok(()) }),
        )
    }

    #[test]
    fn test_build_and_match() {
        let registry = ModuleRegistry::new()
            .route(route_module("api/posts/[id].rs"))
            .route(route_module("api/index.rs"));
        let services = Services::build(&registry, None).unwrap();

        let (route, params) = services.match_route("/posts/42").unwrap();
        assert_eq!(route.path(), "/posts/:id");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        assert!(services.match_route("/").is_some());
        assert!(services.match_route("/missing").is_none());
    }

    #[test]
    fn test_duplicate_shape_is_a_hard_error() {
        let registry = ModuleRegistry::new()
            .route(route_module("api/a/[x].rs"))
            .route(route_module("api/a/[y].rs"));
        let err = Services::build(&registry, None).unwrap_err();
        match err {
            ManifestError::DuplicateRoute { filename, other, shape, .. } => {
                assert_eq!(filename, "api/a/[y].rs");
                assert_eq!(other, "api/a/[x].rs");
                assert_eq!(shape, "/a/:");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_literal_route_outranks_parameter() {
        let registry = ModuleRegistry::new()
            .route(route_module("api/posts/[id].rs"))
            .route(route_module("api/posts/latest.rs"));
        let services = Services::build(&registry, None).unwrap();

        let (route, _) = services.match_route("/posts/latest").unwrap();
        assert_eq!(route.path(), "/posts/latest");
        let (route, _) = services.match_route("/posts/42").unwrap();
        assert_eq!(route.path(), "/posts/:id");
    }

    #[test]
    fn test_queue_projects_post_only_route() {
        let registry = ModuleRegistry::new().queue(
            queue_module("queues/screenshots.rs").with_config(QueueConfig {
                url: Some("/screenshots".to_string()),
                ..Default::default()
            }),
        );
        let services = Services::build(&registry, None).unwrap();

        let (route, _) = services.match_route("/screenshots").unwrap();
        assert!(route.accepts_method(&Method::POST));
        assert!(!route.accepts_method(&Method::GET));
        assert!(matches!(route.target, RouteTarget::Queue(_)));
    }

    #[test]
    fn test_fifo_queue_url_requires_group_param() {
        let registry = ModuleRegistry::new().queue(
            queue_module("queues/tasks.fifo.rs").with_config(QueueConfig {
                url: Some("/tasks".to_string()),
                ..Default::default()
            }),
        );
        let err = Services::build(&registry, None).unwrap_err();
        assert!(matches!(err, ManifestError::FifoUrlMissingGroup { .. }));

        let registry = ModuleRegistry::new().queue(
            queue_module("queues/tasks.fifo.rs").with_config(QueueConfig {
                url: Some("/tasks/[group]".to_string()),
                ..Default::default()
            }),
        );
        assert!(Services::build(&registry, None).is_ok());
    }

    #[test]
    fn test_queue_route_collides_with_module_route() {
        let registry = ModuleRegistry::new()
            .route(route_module("api/screenshots.rs"))
            .queue(
                queue_module("queues/screenshots.rs").with_config(QueueConfig {
                    url: Some("/screenshots".to_string()),
                    ..Default::default()
                }),
            );
        assert!(matches!(
            Services::build(&registry, None),
            Err(ManifestError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn test_timeouts_clamped() {
        let registry = ModuleRegistry::new()
            .route(
                route_module("api/slow.rs").with_config(RouteConfig {
                    timeout: Some(600),
                    ..Default::default()
                }),
            )
            .queue(queue_module("queues/work.rs").with_config(QueueConfig {
                timeout: Some(9_999),
                ..Default::default()
            }));
        let services = Services::build(&registry, None).unwrap();

        let route = services.route("/slow").unwrap();
        assert_eq!(route.timeout, config::MAX_HTTP_TIMEOUT_SECS);
        assert_eq!(
            services.queue("work").unwrap().timeout,
            config::MAX_QUEUE_TIMEOUT_SECS
        );
    }

    #[test]
    fn test_self_url_resolves_registration() {
        let registry = ModuleRegistry::new().route(route_module("api/posts/[id].rs"));
        let services =
            Services::build(&registry, Some(Url::parse("https://h").unwrap())).unwrap();

        let bound = services.self_url("api/posts/[id].rs").unwrap();
        let mut params = HashMap::new();
        params.insert("id".to_string(), crate::path::UrlValue::One("9".to_string()));
        assert_eq!(
            bound.build(&params, &HashMap::new()).unwrap(),
            "https://h/posts/9"
        );
    }

    #[test]
    fn test_content_type_family_match() {
        let registry = ModuleRegistry::new().route(
            route_module("api/upload.rs").with_config(RouteConfig {
                accepts: Some(vec!["image/*".to_string(), "application/json".to_string()]),
                ..Default::default()
            }),
        );
        let services = Services::build(&registry, None).unwrap();
        let route = services.route("/upload").unwrap();

        assert!(route.accepts_content_type("image/png"));
        assert!(route.accepts_content_type("application/json"));
        assert!(!route.accepts_content_type("text/plain"));
    }
}
