//! Result-to-response coercion
//!
//! Handlers return tagged values; turning one into a response is a total
//! function. Post-processing adds the canonical headers: an ETag and
//! Cache-Control on 200 responses per the route's policies, and the CORS
//! triple whenever the route enables CORS. Headers already present on a
//! user-supplied response always win.

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, CONTENT_TYPE, ETAG,
};
use http::{HeaderValue, StatusCode};
use tracing::warn;

use super::HttpResponse;
use crate::manifest::Route;
use crate::module::{CachePolicy, EtagPolicy, HandlerValue};

/// Allowed request headers advertised on CORS responses
const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// Coerce a handler value into the final response for its route
pub fn coerce_response(value: HandlerValue, route: &Route) -> HttpResponse {
    // Policies that inspect the handler value must run before the value is
    // consumed by conversion
    let etag = match &route.etag {
        EtagPolicy::Disabled => None,
        EtagPolicy::Enabled => Some(EtagSource::Body),
        EtagPolicy::Fixed(tag) => Some(EtagSource::Value(tag.clone())),
        EtagPolicy::FromResult(f) => f(&value).map(EtagSource::Value),
    };
    let cache_seconds = match &route.cache {
        CachePolicy::Off => None,
        CachePolicy::Seconds(seconds) => Some(*seconds),
        CachePolicy::FromResult(f) => f(&value),
    };

    let mut response = into_response(value, route);

    if response.status == StatusCode::OK {
        if !response.headers.contains_key(ETAG) {
            let tag = match etag {
                Some(EtagSource::Body) => Some(quote(&format!("{:x}", md5::compute(&response.body)))),
                Some(EtagSource::Value(tag)) => Some(quote(&tag)),
                None => None,
            };
            if let Some(tag) = tag {
                if let Ok(value) = HeaderValue::from_str(&tag) {
                    response.headers.insert(ETAG, value);
                }
            }
        }
        if !response.headers.contains_key(CACHE_CONTROL) {
            if let Some(seconds) = cache_seconds.filter(|seconds| *seconds > 0) {
                let directive = format!("private, max-age={seconds}, must-revalidate");
                if let Ok(value) = HeaderValue::from_str(&directive) {
                    response.headers.insert(CACHE_CONTROL, value);
                }
            }
        }
    }

    if route.cors {
        merge_cors(&mut response, route);
    }
    response
}

enum EtagSource {
    Body,
    Value(String),
}

fn into_response(value: HandlerValue, route: &Route) -> HttpResponse {
    match value {
        HandlerValue::Response(response) => response,
        HandlerValue::Raw { data, content_type } => HttpResponse::new(StatusCode::OK)
            .with_header(CONTENT_TYPE, &content_type)
            .with_body(data),
        HandlerValue::Text(text) => HttpResponse::text(text),
        HandlerValue::Json(json) => HttpResponse::json(&json),
        HandlerValue::Empty => {
            warn!(route = %route.path(), "handler produced no response, returning 204");
            HttpResponse::new(StatusCode::NO_CONTENT)
        }
    }
}

fn quote(tag: &str) -> String {
    if tag.starts_with('"') {
        tag.to_string()
    } else {
        format!("\"{tag}\"")
    }
}

/// Add the CORS triple where the response does not already carry it
pub fn merge_cors(response: &mut HttpResponse, route: &Route) {
    if !response.headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
        response
            .headers
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }
    if !response.headers.contains_key(ACCESS_CONTROL_ALLOW_METHODS) {
        if let Ok(value) = HeaderValue::from_str(&route.allowed_methods_header()) {
            response.headers.insert(ACCESS_CONTROL_ALLOW_METHODS, value);
        }
    }
    if !response.headers.contains_key(ACCESS_CONTROL_ALLOW_HEADERS) {
        response.headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        );
    }
}

/// The 204 CORS preflight response for a route
pub fn preflight(route: &Route) -> HttpResponse {
    let mut response = HttpResponse::new(StatusCode::NO_CONTENT);
    merge_cors(&mut response, route);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{route_handler, ModuleRegistry, RouteConfig, RouteModule};
    use crate::manifest::Services;
    use std::sync::Arc;

    fn route_with(config: RouteConfig) -> Route {
        let registry = ModuleRegistry::new().route(
            RouteModule::new("api/x.rs")
                .get(route_handler(|_request, _meta| async {
                    Ok(HandlerValue::Empty)
                }))
                .with_config(config),
        );
        Services::build(&registry, None)
            .unwrap()
            .route("/x")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_identical_bodies_carry_identical_etags() {
        let route = route_with(RouteConfig::default());
        let first = coerce_response(HandlerValue::Text("same".to_string()), &route);
        let second = coerce_response(HandlerValue::Text("same".to_string()), &route);
        let tag = first.header(ETAG).unwrap();
        assert_eq!(Some(tag), second.header(ETAG));
        assert!(tag.starts_with('"') && tag.ends_with('"'));
    }

    #[test]
    fn test_no_etag_or_cache_on_non_200() {
        let route = route_with(RouteConfig {
            cache: CachePolicy::Seconds(60),
            ..Default::default()
        });
        let response = coerce_response(
            HandlerValue::Response(HttpResponse::new(StatusCode::CREATED)),
            &route,
        );
        assert!(response.header(ETAG).is_none());
        assert!(response.header(CACHE_CONTROL).is_none());
    }

    #[test]
    fn test_cache_control_directive_format() {
        let route = route_with(RouteConfig {
            cache: CachePolicy::Seconds(300),
            ..Default::default()
        });
        let response = coerce_response(HandlerValue::Text("x".to_string()), &route);
        assert_eq!(
            response.header(CACHE_CONTROL),
            Some("private, max-age=300, must-revalidate")
        );
    }

    #[test]
    fn test_user_supplied_etag_wins() {
        let route = route_with(RouteConfig::default());
        let supplied = HttpResponse::new(StatusCode::OK).with_header(ETAG, "\"mine\"");
        let response = coerce_response(HandlerValue::Response(supplied), &route);
        assert_eq!(response.header(ETAG), Some("\"mine\""));
    }

    #[test]
    fn test_fixed_etag_policy_is_quoted() {
        let route = route_with(RouteConfig {
            etag: crate::module::EtagPolicy::Fixed("v7".to_string()),
            ..Default::default()
        });
        let response = coerce_response(HandlerValue::Text("x".to_string()), &route);
        assert_eq!(response.header(ETAG), Some("\"v7\""));
    }

    #[test]
    fn test_cache_policy_from_result() {
        let route = route_with(RouteConfig {
            cache: CachePolicy::FromResult(Arc::new(|value| match value {
                HandlerValue::Json(json) => json.get("ttl").and_then(|v| v.as_u64()),
                _ => None,
            })),
            ..Default::default()
        });
        let response = coerce_response(
            HandlerValue::Json(serde_json::json!({"ttl": 120})),
            &route,
        );
        assert_eq!(
            response.header(CACHE_CONTROL),
            Some("private, max-age=120, must-revalidate")
        );
    }

    #[test]
    fn test_empty_coerces_to_204() {
        let route = route_with(RouteConfig::default());
        let response = coerce_response(HandlerValue::Empty, &route);
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_preflight_carries_cors_triple() {
        let route = route_with(RouteConfig {
            methods: Some(vec![http::Method::GET, http::Method::POST]),
            ..Default::default()
        });
        let response = preflight(&route);
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.header(ACCESS_CONTROL_ALLOW_ORIGIN), Some("*"));
        assert_eq!(
            response.header(ACCESS_CONTROL_ALLOW_METHODS),
            Some("GET, POST")
        );
        assert_eq!(
            response.header(ACCESS_CONTROL_ALLOW_HEADERS),
            Some("Content-Type, Authorization")
        );
    }
}
