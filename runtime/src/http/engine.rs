//! HTTP request engine
//!
//! Fixed pipeline per request: resolve → CORS preflight → method check →
//! content-type check → ambient scope → onRequest → authenticate → handler
//! → coercion → onResponse, with onError catching non-response failures.
//! A deadline of the route's timeout bounds the scoped steps; on expiry
//! the handler's cancellation signal fires and the caller gets
//! 500 "Timed Out".

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::respond::{coerce_response, merge_cors, preflight};
use super::{HttpRequest, HttpResponse};
use crate::context::{self, RequestContext};
use crate::errors::DispatchError;
use crate::manifest::{Route, RouteTarget};
use crate::module::{HandlerFailure, HandlerMeta, HandlerValue, Payload};
use crate::queue::JobRequest;
use crate::state::RuntimeState;

/// Outcome of the scoped pipeline steps, before error mapping
enum Step {
    /// A response was produced (handler return, thrown response, enqueue
    /// acknowledgement); proceeds to onResponse
    Completed(HttpResponse),
    /// A non-response failure; proceeds to onError
    Errored(DispatchError),
}

/// Dispatches HTTP requests against the manifest
#[derive(Clone)]
pub struct HttpEngine {
    state: Arc<RuntimeState>,
}

impl HttpEngine {
    pub fn new(state: Arc<RuntimeState>) -> Self {
        Self { state }
    }

    /// Run one request through the pipeline. Always produces a response.
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let started = Instant::now();
        let method = request.method.clone();
        let path = request.path().to_string();

        let response = self.dispatch(request).await;

        info!(
            method = %method,
            path = %path,
            status = %response.status.as_u16(),
            elapsed_ms = %started.elapsed().as_millis(),
            "request dispatched"
        );
        response
    }

    async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        // 1. Resolve
        let Some((route, params)) = self.state.services.match_route(request.path()) else {
            debug!(path = %request.path(), "no route matched");
            return plain_status(StatusCode::NOT_FOUND);
        };
        let route = route.clone();
        debug!(path = %request.path(), route = %route.path(), "route matched");

        // 2. CORS preflight short-circuits before auth
        if route.cors && request.method == Method::OPTIONS {
            return preflight(&route);
        }

        // 3. Method check
        if !route.accepts_method(&request.method) {
            return self.finish(
                &route,
                &DispatchError::MethodNotAllowed {
                    method: request.method.clone(),
                    path: route.path().to_string(),
                },
            );
        }

        // 4. Content-type check for body-carrying methods
        if request.method != Method::GET && request.method != Method::HEAD {
            let content_type = request.content_type();
            let accepted = match &content_type {
                Some(content_type) => route.accepts_content_type(content_type),
                None => route.accepts_content_type(""),
            };
            if !accepted {
                return self.finish(
                    &route,
                    &DispatchError::UnsupportedMediaType {
                        content_type: content_type.unwrap_or_default(),
                    },
                );
            }
        }

        // 5. Scope open; the deadline bounds everything from here on
        let token = CancellationToken::new();
        let ambient = Arc::new(RequestContext::new(self.state.clone()));
        let deadline = Duration::from_secs(route.timeout);
        let head = request.method == Method::HEAD;

        // The scoped steps run on their own task: on deadline the signal
        // fires and the task is abandoned, not terminated. Its further
        // effects are ignored.
        let engine = self.clone();
        let scoped_ambient = ambient.clone();
        let scoped_route = route.clone();
        let scoped_token = token.clone();
        let mut work = tokio::spawn(async move {
            context::scope(
                scoped_ambient.clone(),
                engine.run_scoped(scoped_route, request, params, scoped_ambient, scoped_token),
            )
            .await
        });

        let mut response = tokio::select! {
            joined = &mut work => match joined {
                Ok(Ok(response)) => response,
                Ok(Err(context_error)) => self.finish(&route, &context_error.into()),
                Err(join_error) => {
                    error!(route = %route.path(), error = %join_error, "request task panicked");
                    self.finish(&route, &DispatchError::handler(join_error.to_string()))
                }
            },
            _ = tokio::time::sleep(deadline) => {
                token.cancel();
                warn!(route = %route.path(), timeout_secs = route.timeout, "request timed out");
                let mut timed_out = HttpResponse::text("Timed Out")
                    .with_status(StatusCode::INTERNAL_SERVER_ERROR);
                if route.cors {
                    merge_cors(&mut timed_out, &route);
                }
                timed_out
            }
        };

        if head {
            response.body = bytes::Bytes::new();
        }
        response
    }

    /// Steps 6–10, inside the ambient scope and the deadline
    async fn run_scoped(
        &self,
        route: Route,
        request: HttpRequest,
        params: std::collections::HashMap<String, String>,
        ambient: Arc<RequestContext>,
        token: CancellationToken,
    ) -> HttpResponse {
        let step = self
            .run_handler(&route, &request, params, &ambient, token)
            .await;

        match step {
            Step::Completed(mut response) => {
                // 10. onResponse may replace the response by failing with one
                if let Some(hook) = &route.middleware.on_response {
                    match hook(request.clone(), response.clone()).await {
                        Ok(()) => {}
                        Err(HandlerFailure::Response(replacement)) => {
                            response = replacement;
                            if route.cors {
                                merge_cors(&mut response, &route);
                            }
                        }
                        Err(HandlerFailure::Error(err)) => {
                            // Logged and reported, but never masks the response
                            error!(route = %route.path(), error = %err, "onResponse middleware failed");
                            if let Some(on_error) = &route.middleware.on_error {
                                on_error(Arc::new(DispatchError::Handler(err)), request.clone())
                                    .await;
                            }
                        }
                    }
                }
                response
            }
            Step::Errored(err) => {
                let err = Arc::new(err);
                if err.logs_error() {
                    error!(route = %route.path(), error = %err, "request failed");
                }
                if err.invokes_on_error() {
                    if let Some(on_error) = &route.middleware.on_error {
                        on_error(err.clone(), request.clone()).await;
                    }
                }
                self.finish(&route, &err)
            }
        }
    }

    /// Steps 6–9: request middleware, auth, handler, coercion
    async fn run_handler(
        &self,
        route: &Route,
        request: &HttpRequest,
        params: std::collections::HashMap<String, String>,
        ambient: &Arc<RequestContext>,
        token: CancellationToken,
    ) -> Step {
        // 6. onRequest may short-circuit with a response
        if let Some(hook) = &route.middleware.on_request {
            match hook(request.clone()).await {
                Ok(()) => {}
                Err(HandlerFailure::Response(response)) => {
                    return Step::Completed(with_cors(response, route));
                }
                Err(HandlerFailure::Error(err)) => {
                    return Step::Errored(DispatchError::Handler(err));
                }
            }
        }

        // 7. Authenticate and pin the principal
        let cookies = request.cookies();
        if let Some(authenticate) = &route.middleware.authenticate {
            match authenticate(request.clone(), cookies.clone()).await {
                Ok(user) => {
                    if let Some(user) = &user {
                        if user.id.is_empty() {
                            return Step::Errored(DispatchError::Forbidden {
                                reason: "authenticate returned a user without an id".to_string(),
                            });
                        }
                    }
                    if let Err(err) = ambient.set_user(user) {
                        return Step::Errored(err.into());
                    }
                }
                Err(HandlerFailure::Response(response)) => {
                    return Step::Completed(with_cors(response, route));
                }
                Err(HandlerFailure::Error(err)) => {
                    return Step::Errored(DispatchError::Handler(err));
                }
            }
        }

        // 8 + 9. Handler and coercion
        match &route.target {
            RouteTarget::Module(module) => {
                let Some(handler) = module.handler(&request.method) else {
                    return Step::Errored(DispatchError::MethodNotAllowed {
                        method: request.method.clone(),
                        path: route.path().to_string(),
                    });
                };
                let meta = HandlerMeta {
                    cookies,
                    params,
                    signal: token,
                    user: ambient.user(),
                };
                match handler(request.clone(), meta).await {
                    Ok(value) => Step::Completed(coerce_response(value, route)),
                    // A thrown response is a completed non-200 result
                    Err(HandlerFailure::Response(response)) => {
                        Step::Completed(coerce_response(HandlerValue::Response(response), route))
                    }
                    Err(HandlerFailure::Error(err)) => {
                        Step::Errored(DispatchError::Handler(err))
                    }
                }
            }
            RouteTarget::Queue(queue) => {
                let payload = match decode_body(request) {
                    Ok(payload) => payload,
                    Err(err) => return Step::Errored(err),
                };
                let mut job = JobRequest::new(queue.name.clone(), payload);
                job.group_id = params.get("group").cloned();
                job.params = params;
                match ambient.queue_job(job).await {
                    Ok(message_id) => Step::Completed(with_cors(
                        HttpResponse::json(&serde_json::json!({ "messageId": message_id }))
                            .with_status(StatusCode::ACCEPTED),
                        route,
                    )),
                    Err(err) => Step::Errored(err),
                }
            }
        }
    }

    /// Map a dispatch error to its response, with CORS merged
    fn finish(&self, route: &Route, err: &DispatchError) -> HttpResponse {
        let status = err.status();
        let body = status
            .canonical_reason()
            .unwrap_or("Error")
            .to_string();
        let mut response = HttpResponse::text(body).with_status(status);
        if route.cors {
            merge_cors(&mut response, route);
        }
        response
    }
}

fn with_cors(mut response: HttpResponse, route: &Route) -> HttpResponse {
    if route.cors {
        merge_cors(&mut response, route);
    }
    response
}

fn plain_status(status: StatusCode) -> HttpResponse {
    HttpResponse::text(status.canonical_reason().unwrap_or("Error")).with_status(status)
}

/// Decode a request body for enqueueing, honouring its content type
fn decode_body(request: &HttpRequest) -> Result<Payload, DispatchError> {
    let body = request.body.clone();
    match request.content_type().as_deref() {
        Some(content_type)
            if content_type == "application/json" || content_type.ends_with("+json") =>
        {
            serde_json::from_slice(&body)
                .map(Payload::Json)
                .map_err(|err| DispatchError::handler(format!("invalid JSON body: {err}")))
        }
        Some(content_type) if content_type.starts_with("text/") => {
            match String::from_utf8(body.to_vec()) {
                Ok(text) => Ok(Payload::Text(text)),
                Err(_) => Ok(Payload::Binary(body)),
            }
        }
        Some(_) => Ok(Payload::Binary(body)),
        None => match serde_json::from_slice(&body) {
            Ok(json) => Ok(Payload::Json(json)),
            Err(_) => match String::from_utf8(body.to_vec()) {
                Ok(text) => Ok(Payload::Text(text)),
                Err(_) => Ok(Payload::Binary(body)),
            },
        },
    }
}
