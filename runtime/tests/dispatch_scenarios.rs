//! End-to-end dispatch scenarios
//!
//! Exercises the public surface the way an embedder drives it: build a
//! registry, start the runtime, feed host events through the engines and
//! assert on the emitted responses and batch reports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode, Uri};
use parking_lot::Mutex;

use gantry_runtime::config::RuntimeConfig;
use gantry_runtime::context;
use gantry_runtime::host;
use gantry_runtime::http::{HttpRequest, HttpResponse};
use gantry_runtime::module::{
    queue_handler, route_handler, HandlerValue, ModuleRegistry, Payload, QueueConfig,
    QueueModule, RouteConfig, RouteModule,
};
use gantry_runtime::path::UrlValue;
use gantry_runtime::queue::{JobRequest, Message, MessageAttributes};
use gantry_runtime::{Runtime, StartError};

fn get(path: &str) -> HttpRequest {
    HttpRequest::new(Method::GET, path.parse::<Uri>().unwrap())
}

fn message(id: &str, body: &str, group: Option<&str>) -> Message {
    Message {
        id: id.to_string(),
        group_id: group.map(str::to_string),
        receipt_handle: format!("rh-{id}"),
        body: body.to_string(),
        attributes: MessageAttributes::default(),
    }
}

async fn start(registry: ModuleRegistry) -> Runtime {
    Runtime::start(RuntimeConfig::default(), registry)
        .await
        .expect("runtime should start")
}

#[tokio::test]
async fn bracket_normalisation_matches_and_binds_params() {
    let registry = ModuleRegistry::new().route(
        RouteModule::new("api/posts/[id].rs").get(route_handler(|_request, meta| async move {
            Ok(HandlerValue::Json(serde_json::json!({
                "id": meta.params.get("id"),
            })))
        })),
    );
    let runtime = start(registry).await;

    let response = runtime.http().handle(get("/posts/42")).await;
    assert_eq!(response.status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body, serde_json::json!({"id": "42"}));
}

#[tokio::test]
async fn duplicate_shape_fails_startup_naming_a_file() {
    let registry = ModuleRegistry::new()
        .route(RouteModule::new("api/a/[x].rs").get(route_handler(|_r, _m| async {
            Ok(HandlerValue::Empty)
        })))
        .route(RouteModule::new("api/a/[y].rs").get(route_handler(|_r, _m| async {
            Ok(HandlerValue::Empty)
        })));

    let err = Runtime::start(RuntimeConfig::default(), registry)
        .await
        .unwrap_err();
    let StartError::Manifest(manifest_err) = err else {
        panic!("expected a manifest error");
    };
    let message = manifest_err.to_string();
    assert!(message.contains("api/a/[x].rs") || message.contains("api/a/[y].rs"));
}

#[tokio::test]
async fn cors_preflight_advertises_route_methods() {
    let registry = ModuleRegistry::new().route(
        RouteModule::new("api/x.rs")
            .get(route_handler(|_r, _m| async { Ok(HandlerValue::Empty) }))
            .post(route_handler(|_r, _m| async { Ok(HandlerValue::Empty) }))
            .with_config(RouteConfig {
                cors: true,
                ..Default::default()
            }),
    );
    let runtime = start(registry).await;

    let request = HttpRequest::new(Method::OPTIONS, Uri::from_static("/x"));
    let response = runtime.http().handle(request).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(
        response.header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some("*")
    );
    let methods = response
        .header(http::header::ACCESS_CONTROL_ALLOW_METHODS)
        .unwrap();
    assert!(methods.contains("GET") && methods.contains("POST"));
    assert_eq!(
        response.header(http::header::ACCESS_CONTROL_ALLOW_HEADERS),
        Some("Content-Type, Authorization")
    );
}

#[tokio::test]
async fn mismatched_content_type_is_415() {
    let registry = ModuleRegistry::new().route(
        RouteModule::new("api/x.rs")
            .post(route_handler(|_r, _m| async { Ok(HandlerValue::Empty) }))
            .with_config(RouteConfig {
                accepts: Some(vec!["application/json".to_string()]),
                ..Default::default()
            }),
    );
    let runtime = start(registry).await;

    let event = host::http::HttpEvent {
        method: "POST".to_string(),
        path: "/x".to_string(),
        query: None,
        headers: HashMap::from([("content-type".to_string(), "text/plain".to_string())]),
        body: Some("hello".to_string()),
        is_base64_encoded: false,
    };
    let request = host::http::into_request(event).unwrap();
    let response = runtime.http().handle(request).await;
    assert_eq!(response.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn fifo_cutoff_deletes_predecessors_and_reports_the_rest() {
    let handled: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = handled.clone();
    let registry = ModuleRegistry::new().queue(QueueModule::new(
        "queues/orders.fifo.rs",
        queue_handler(move |payload, meta| {
            let sink = sink.clone();
            async move {
                sink.lock().push(meta.message_id.clone());
                match payload {
                    Payload::Json(json) if json.get("fail").is_some() => {
                        Err(gantry_runtime::module::HandlerFailure::error(
                            std::io::Error::other("boom"),
                        ))
                    }
                    _ => Ok(()),
                }
            }
        }),
    ));
    let runtime = start(registry).await;

    let failed = runtime
        .queues()
        .dispatch_batch(
            "orders.fifo",
            vec![
                message("a", "{\"n\":1}", Some("g1")),
                message("b", "{\"fail\":true}", Some("g1")),
                message("c", "{\"n\":3}", Some("g1")),
            ],
            Arc::new(|| 60_000),
        )
        .await;

    assert_eq!(failed, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(
        handled.lock().clone(),
        vec!["a".to_string(), "b".to_string()]
    );
}

#[tokio::test]
async fn timeout_returns_500_timed_out_within_budget() {
    let cancelled: Arc<Mutex<bool>> = Arc::new(Mutex::new(false));
    let observed = cancelled.clone();
    let registry = ModuleRegistry::new().route(
        RouteModule::new("api/slow.rs")
            .get(route_handler(move |_request, meta| {
                let observed = observed.clone();
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = meta.signal.cancelled() => {
                            *observed.lock() = true;
                        }
                    }
                    Ok(HandlerValue::Text("late".to_string()))
                }
            }))
            .with_config(RouteConfig {
                timeout: Some(1),
                ..Default::default()
            }),
    );
    let runtime = start(registry).await;

    let started = Instant::now();
    let response = runtime.http().handle(get("/slow")).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body.as_ref(), b"Timed Out");
    assert!(started.elapsed() < Duration::from_millis(1_500));

    // The abandoned handler observes the fired signal shortly after
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(*cancelled.lock());
}

#[tokio::test]
async fn ambient_enqueue_works_inside_a_handler_and_fails_outside() {
    let registry = ModuleRegistry::new()
        .queue(QueueModule::new(
            "queues/x.rs",
            queue_handler(|_payload, _meta| async { Ok(()) }),
        ))
        .route(RouteModule::new("api/enqueue.rs").post(route_handler(
            |_request, _meta| async {
                let message_id = context::queue_job(JobRequest::new(
                    "x",
                    Payload::Json(serde_json::json!({"n": 1})),
                ))
                .await
                .map_err(|err| gantry_runtime::module::HandlerFailure::error(err.to_string()))?;
                Ok(HandlerValue::Json(serde_json::json!({
                    "messageId": message_id,
                })))
            },
        )));
    let runtime = start(registry).await;

    let mut request = HttpRequest::new(Method::POST, Uri::from_static("/enqueue"));
    request.headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    let response = runtime.http().handle(request).await;
    assert_eq!(response.status, StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert!(body.get("messageId").and_then(|v| v.as_str()).is_some());

    // Outside any event scope the same call fails closed
    let err = context::queue_job(JobRequest::new(
        "x",
        Payload::Json(serde_json::json!({"n": 1})),
    ))
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Runtime not available"));
}

#[tokio::test]
async fn url_builder_produces_absolute_urls_with_query() {
    let config = RuntimeConfig {
        http_base_url: Some(url::Url::parse("https://h").unwrap()),
        ..Default::default()
    };
    let registry = ModuleRegistry::new().route(
        RouteModule::new("api/bookmarks/[id].rs")
            .get(route_handler(|_r, _m| async { Ok(HandlerValue::Empty) })),
    );
    let runtime = Runtime::start(config, registry).await.unwrap();

    let params: HashMap<String, UrlValue> = HashMap::from([
        ("id".to_string(), UrlValue::One("9".to_string())),
        ("q".to_string(), UrlValue::One("z".to_string())),
    ]);
    let url = runtime
        .state()
        .services
        .url_builder()
        .url("/bookmarks/:id", &params, &HashMap::new())
        .unwrap();
    assert_eq!(url, "https://h/bookmarks/9?q=z");
}

#[tokio::test]
async fn queue_backed_route_accepts_post_and_enqueues() {
    let registry = ModuleRegistry::new().queue(
        QueueModule::new(
            "queues/screenshots.rs",
            queue_handler(|_payload, _meta| async { Ok(()) }),
        )
        .with_config(QueueConfig {
            url: Some("/screenshots".to_string()),
            ..Default::default()
        }),
    );
    let runtime = start(registry).await;

    let mut request = HttpRequest::new(Method::POST, Uri::from_static("/screenshots"));
    request.headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    request.body = bytes::Bytes::from_static(b"{\"url\":\"https://example.com\"}");
    let response = runtime.http().handle(request).await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert!(body.get("messageId").is_some());

    // GET is rejected by the projected route
    let response = runtime.http().handle(get("/screenshots")).await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn queue_event_batch_reports_failures_to_the_host() {
    let registry = ModuleRegistry::new().queue(QueueModule::new(
        "queues/tasks.rs",
        queue_handler(|payload, _meta| async move {
            match payload {
                Payload::Json(json) if json.get("fail").is_some() => {
                    Err(gantry_runtime::module::HandlerFailure::error(
                        std::io::Error::other("boom"),
                    ))
                }
                _ => Ok(()),
            }
        }),
    ));
    let runtime = start(registry).await;

    let event: host::queue::QueueEvent = serde_json::from_value(serde_json::json!({
        "records": [
            {
                "messageId": "m1",
                "receiptHandle": "rh1",
                "body": "{\"n\":1}",
                "eventSourceARN": "arn:aws:sqs:us-east-1:1:tasks"
            },
            {
                "messageId": "m2",
                "receiptHandle": "rh2",
                "body": "{\"fail\":true}",
                "eventSourceARN": "arn:aws:sqs:us-east-1:1:tasks"
            }
        ]
    }))
    .unwrap();

    let report = host::queue::dispatch(&runtime.queues(), event, Arc::new(|| 60_000)).await;
    let failed: Vec<&str> = report
        .batch_item_failures
        .iter()
        .map(|item| item.item_identifier.as_str())
        .collect();
    assert_eq!(failed, vec!["m2"]);
}

#[tokio::test]
async fn socket_lifecycle_connect_message_disconnect() {
    let presence: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let online_sink = presence.clone();
    let offline_sink = presence.clone();

    let middleware = gantry_runtime::middleware::Middleware::new()
        .authenticate(Arc::new(|_request, _cookies| {
            Box::pin(async { Ok(Some(gantry_runtime::User::new("u1"))) })
        }))
        .on_online(Arc::new(move |user_id| {
            let sink = online_sink.clone();
            Box::pin(async move {
                sink.lock().push(format!("online:{user_id}"));
            })
        }))
        .on_offline(Arc::new(move |user_id| {
            let sink = offline_sink.clone();
            Box::pin(async move {
                sink.lock().push(format!("offline:{user_id}"));
            })
        }));

    let registry = ModuleRegistry::new().socket(
        gantry_runtime::SocketModule::new(
            "socket.rs",
            gantry_runtime::module::socket_handler(|_payload, meta| async move {
                // Echo back to the sending user through the ambient context
                if let Some(user) = &meta.user {
                    let _ = context::send_socket_message(
                        Payload::Text("ack".to_string()),
                        &[user.id.clone()],
                    )
                    .await;
                }
                Ok(())
            }),
        )
        .with_middleware(middleware),
    );
    let runtime = start(registry).await;
    let engine = runtime.sockets();

    let connect = host::socket::SocketEvent::Connect {
        connection_id: "c1".to_string(),
        request_id: None,
        headers: HashMap::new(),
    };
    assert_eq!(
        host::socket::dispatch(&engine, connect).await.unwrap(),
        StatusCode::NO_CONTENT
    );

    let message = host::socket::SocketEvent::Message {
        connection_id: "c1".to_string(),
        request_id: "r1".to_string(),
        body: "{\"hello\":true}".to_string(),
        is_base64_encoded: false,
    };
    assert_eq!(
        host::socket::dispatch(&engine, message).await.unwrap(),
        StatusCode::OK
    );

    let disconnect = host::socket::SocketEvent::Disconnect {
        connection_id: "c1".to_string(),
    };
    assert_eq!(
        host::socket::dispatch(&engine, disconnect).await.unwrap(),
        StatusCode::OK
    );

    assert_eq!(
        presence.lock().clone(),
        vec!["online:u1".to_string(), "offline:u1".to_string()]
    );
}

#[tokio::test]
async fn etag_is_stable_for_identical_bodies() {
    let registry = ModuleRegistry::new().route(
        RouteModule::new("api/doc.rs").get(route_handler(|_r, _m| async {
            Ok(HandlerValue::Json(serde_json::json!({"v": 1})))
        })),
    );
    let runtime = start(registry).await;

    let first = runtime.http().handle(get("/doc")).await;
    let second = runtime.http().handle(get("/doc")).await;
    let tag = first.header(http::header::ETAG).unwrap();
    assert_eq!(Some(tag), second.header(http::header::ETAG));
}

#[tokio::test]
async fn thrown_response_skips_error_middleware() {
    let errors: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let sink = errors.clone();
    let middleware = gantry_runtime::middleware::Middleware::new().on_error(Arc::new(
        move |_err, _request| {
            let sink = sink.clone();
            Box::pin(async move {
                *sink.lock() += 1;
            })
        },
    ));
    let registry = ModuleRegistry::new().route(
        RouteModule::new("api/teapot.rs")
            .get(route_handler(|_request, _meta| async {
                Err(gantry_runtime::module::HandlerFailure::Response(
                    HttpResponse::text("short and stout").with_status(StatusCode::IM_A_TEAPOT),
                ))
            }))
            .with_middleware(middleware),
    );
    let runtime = start(registry).await;

    let response = runtime.http().handle(get("/teapot")).await;
    assert_eq!(response.status, StatusCode::IM_A_TEAPOT);
    assert_eq!(*errors.lock(), 0);
}
