//! Request forwarding to the upstream API.
//!
//! The client body is buffered, obfuscated with one dictionary snapshot and
//! sent through the proxy pool (falling back to a direct connection). The
//! upstream answer is de-obfuscated with the same snapshot, either buffered or
//! chunk by chunk for event streams.

use super::context::{ProxyState, RequestInfo};
use super::headers::{
    is_event_stream, outbound_headers, response_headers, VeilHeadersExt, VALUE_DIRECT,
    VALUE_JSON, X_VEIL_ROUTE,
};
use crate::analytics::{model_from_body, AuthFailureEvent, AuthFailureSink};
use crate::metrics;
use crate::obfuscation::{rewrite_stream, Dictionaries};
use crate::routing::Selection;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type of every response the proxy produces.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("no usable proxy in the pool and direct fallback is disabled")]
    NoRoute,
}

/// How a request reached the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy { name: String, index: usize },
}

impl Route {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Route::Direct => "direct",
            Route::Proxy { .. } => "proxy",
        }
    }
}

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed_unsync()
}

/// Helper function to create a JSON error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response.set_header(&CONTENT_TYPE, &VALUE_JSON);
    response
}

async fn send(
    client: &reqwest::Client,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<reqwest::Response, reqwest::Error> {
    client
        .request(method.clone(), url)
        .headers(headers.clone())
        .body(body.clone())
        .send()
        .await
}

/// Send the request through the pool, retrying with the next proxy on
/// transport errors, then directly when the pool cannot carry it.
pub async fn send_with_failover(
    state: &ProxyState,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(reqwest::Response, Route), ForwardError> {
    let mut pool_in_use = false;
    let mut last_error = None;

    for attempt in 1..=state.upstream.max_attempts.max(1) {
        let (client, entry, index) = match state.router.select_connector(url) {
            Selection::Direct => break,
            Selection::Exhausted { .. } => {
                pool_in_use = true;
                break;
            }
            Selection::Selected {
                connector,
                entry,
                index,
            } => (connector, entry, index),
        };
        pool_in_use = true;

        let start = Instant::now();
        match send(&client, method, url, headers, body).await {
            Ok(response) => {
                let route = Route::Proxy {
                    name: entry.display_name().to_string(),
                    index,
                };
                metrics::record_upstream_duration(
                    route.label(),
                    response.status().as_u16(),
                    start.elapsed().as_secs_f64() * 1000.0,
                );
                return Ok((response, route));
            }
            Err(e) => {
                warn!(
                    "Attempt {} via proxy #{} ({}) failed: {}",
                    attempt,
                    index,
                    entry.display_name(),
                    e
                );
                metrics::record_proxy_selection(entry.display_name(), metrics::PROXY_FAILED);
                last_error = Some(e);
            }
        }
    }

    if pool_in_use && !state.upstream.direct_fallback {
        return Err(last_error.map_or(ForwardError::NoRoute, ForwardError::Upstream));
    }
    if pool_in_use {
        warn!("Falling back to a direct connection for {}", url);
    }

    let start = Instant::now();
    let response = send(&state.direct_client, method, url, headers, body).await?;
    metrics::record_upstream_duration(
        Route::Direct.label(),
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0,
    );
    Ok((response, Route::Direct))
}

/// Forward a client request and rewrite the answer.
pub async fn forward_request(state: &ProxyState, req: Request<Incoming>) -> Response<ProxyBody> {
    let (parts, body) = req.into_parts();
    let info = RequestInfo::from_parts(&parts);

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("Failed to collect request body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    // One snapshot serves the whole exchange, even across a reload
    let dictionaries = state.store.transforms().snapshot();

    let rewritten = dictionaries.obfuscate_request_body(body.clone());
    if rewritten.is_rewritten() {
        debug!(
            "Obfuscated {} strings in request body",
            rewritten.strings_rewritten()
        );
        metrics::record_substitutions(metrics::DIRECTION_REQUEST, 1);
    }
    let outbound_body = rewritten.into_bytes();

    let url = state.upstream_url(info.path_and_query());
    let headers = outbound_headers(&info.headers);
    debug!("Forwarding to: {}", url);

    let (upstream, route) =
        match send_with_failover(state, &info.method, &url, &headers, &outbound_body).await {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to forward request to upstream: {}", e);
                return error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
            }
        };

    if upstream.status() == StatusCode::UNAUTHORIZED {
        if let Some(log) = &state.auth_failures {
            log.record(AuthFailureEvent::new(
                info.uri.path(),
                info.method.as_str(),
                model_from_body(&body),
            ));
        }
    }

    let mut response = if is_event_stream(upstream.headers()) {
        stream_response(upstream, &dictionaries)
    } else {
        buffered_response(upstream, &dictionaries).await
    };

    set_route_header(&mut response, &route);
    response
}

/// Tag the response with the proxy name, or `proxy-<index>` when the name is
/// not a valid header value.
fn set_route_header(response: &mut Response<ProxyBody>, route: &Route) {
    match route {
        Route::Direct => response.set_header(&X_VEIL_ROUTE, &VALUE_DIRECT),
        Route::Proxy { name, index } => {
            if !response.set_header_value(&X_VEIL_ROUTE, name) {
                debug!(
                    "Proxy name {:?} is not a valid header value, reporting proxy-{}",
                    name, index
                );
                response.set_header_value(&X_VEIL_ROUTE, &format!("proxy-{index}"));
            }
        }
    }
}

fn stream_response(
    upstream: reqwest::Response,
    dictionaries: &Arc<Dictionaries>,
) -> Response<ProxyBody> {
    let status = upstream.status();
    let headers = response_headers(upstream.headers(), false);

    let stream = rewrite_stream(upstream.bytes_stream(), dictionaries.stream_rewriter())
        .map_ok(Frame::data)
        .map_err(|e| Box::new(e) as BoxError);

    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

async fn buffered_response(
    upstream: reqwest::Response,
    dictionaries: &Dictionaries,
) -> Response<ProxyBody> {
    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();

    let body = match upstream.bytes().await {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to collect upstream response body: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, "Failed to read upstream response");
        }
    };

    let rewritten = dictionaries.deobfuscate_response_body(body);
    let changed = rewritten.is_rewritten();
    if changed {
        debug!(
            "Restored {} strings in response body",
            rewritten.strings_rewritten()
        );
        metrics::record_substitutions(metrics::DIRECTION_RESPONSE, 1);
    }

    let mut response = Response::new(full_body(rewritten.into_bytes()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers(&upstream_headers, !changed);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_string(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_error_response_is_json() {
        let response = error_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        assert_eq!(response.status(), 502);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(body_string(response).await, r#"{"error":"Bad Gateway"}"#);
    }

    #[tokio::test]
    async fn test_error_response_escapes_message() {
        let response = error_response(StatusCode::BAD_REQUEST, "bad \"input\"");
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"], "bad \"input\"");
    }

    #[test]
    fn test_route_header_names_proxy() {
        let mut response = Response::new(full_body(""));
        set_route_header(
            &mut response,
            &Route::Proxy {
                name: "dc-1".to_string(),
                index: 2,
            },
        );
        assert_eq!(response.headers()["x-veil-route"], "dc-1");

        set_route_header(&mut response, &Route::Direct);
        assert_eq!(response.headers()["x-veil-route"], "direct");
    }

    #[test]
    fn test_route_header_falls_back_to_index() {
        let mut response = Response::new(full_body(""));
        set_route_header(
            &mut response,
            &Route::Proxy {
                name: "bad\nname".to_string(),
                index: 3,
            },
        );
        assert_eq!(response.headers()["x-veil-route"], "proxy-3");
    }

    #[test]
    fn test_route_labels() {
        assert_eq!(Route::Direct.label(), "direct");
        assert_eq!(
            Route::Proxy {
                name: "dc-1".to_string(),
                index: 0
            }
            .label(),
            "proxy"
        );
    }
}
