//! Request dispatch: administrative routes under [`ADMIN_PREFIX`], everything
//! else is forwarded.

use super::context::ProxyState;
use super::forwarding::{error_response, forward_request, full_body, ProxyBody};
use super::headers::{VeilHeadersExt, VALUE_JSON};
use crate::metrics;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Paths under this prefix are answered by the proxy itself.
pub const ADMIN_PREFIX: &str = "/_veil";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdminRoute {
    /// GET /_veil/health
    Health,
    /// GET /_veil/metrics
    Metrics,
    /// POST /_veil/reload
    Reload,
    /// GET /_veil/auth-failures
    AuthFailures,
    Unknown,
}

impl AdminRoute {
    /// `None` when the path belongs to the upstream.
    fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix(ADMIN_PREFIX)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        Some(match rest.trim_end_matches('/') {
            "/health" => AdminRoute::Health,
            "/metrics" => AdminRoute::Metrics,
            "/reload" => AdminRoute::Reload,
            "/auth-failures" => AdminRoute::AuthFailures,
            _ => AdminRoute::Unknown,
        })
    }

    fn method(self) -> Option<Method> {
        match self {
            AdminRoute::Health | AdminRoute::Metrics | AdminRoute::AuthFailures => {
                Some(Method::GET)
            }
            AdminRoute::Reload => Some(Method::POST),
            AdminRoute::Unknown => None,
        }
    }
}

/// Entry point for every request accepted by the server.
pub async fn handle_request(
    state: Arc<ProxyState>,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let start_time = std::time::Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Received request: {} {}", method, req.uri());

    let response = match AdminRoute::parse(&path) {
        Some(route) => handle_admin(&state, route, &method).await,
        None => forward_request(&state, req).await,
    };

    let status = response.status().as_u16();
    metrics::record_request(method.as_str(), status);
    debug!(
        "{} {} -> {} ({:.1}ms)",
        method,
        path,
        status,
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    Ok(response)
}

async fn handle_admin(
    state: &ProxyState,
    route: AdminRoute,
    method: &Method,
) -> Response<ProxyBody> {
    match route.method() {
        None => return error_response(StatusCode::NOT_FOUND, "Not Found"),
        Some(expected) if expected != method => {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
        Some(_) => {}
    }

    match route {
        AdminRoute::Health => handle_health(state),
        AdminRoute::Metrics => handle_metrics(),
        AdminRoute::Reload => handle_reload(state).await,
        AdminRoute::AuthFailures => handle_auth_failures(state),
        AdminRoute::Unknown => error_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ProxyBody> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(full_body(body));
            *response.status_mut() = status;
            response.set_header(&CONTENT_TYPE, &VALUE_JSON);
            response
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("Failed to serialize response: {e}"),
        ),
    }
}

fn handle_health(state: &ProxyState) -> Response<ProxyBody> {
    let dictionaries = state.store.transforms().snapshot();
    json_response(
        StatusCode::OK,
        &serde_json::json!({
            "status": "ok",
            "upstream": state.upstream.base_url(),
            "dictionaries": {
                "forward": dictionaries.forward.len(),
                "reverse": dictionaries.reverse.len(),
            },
            "proxies": state.store.pool().len(),
            "analytics": state.auth_failures.is_some(),
        }),
    )
}

fn handle_metrics() -> Response<ProxyBody> {
    let mut response = Response::new(full_body(metrics::collect_metrics()));
    response.set_header(
        &CONTENT_TYPE,
        &HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

async fn handle_reload(state: &ProxyState) -> Response<ProxyBody> {
    info!("Reload requested via admin route");
    match Arc::clone(&state.store).reload_blocking().await {
        Ok(summary) => json_response(StatusCode::OK, &summary),
        Err(e) => {
            error!("Reload task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Reload failed")
        }
    }
}

fn handle_auth_failures(state: &ProxyState) -> Response<ProxyBody> {
    match &state.auth_failures {
        Some(log) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "total": log.total(),
                "buckets": log.snapshot(),
            }),
        ),
        None => error_response(StatusCode::NOT_FOUND, "Analytics disabled"),
    }
}
