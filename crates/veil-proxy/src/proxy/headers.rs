//! Header filtering and Veil's own response headers.
//!
//! hyper and reqwest share the `http` crate, so header maps move between the
//! inbound request, the outbound request and the response without conversion.

use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::Response;

/// Which route carried the request: `direct` or the proxy's display name
pub static X_VEIL_ROUTE: HeaderName = HeaderName::from_static("x-veil-route");

pub static VALUE_DIRECT: HeaderValue = HeaderValue::from_static("direct");
pub static VALUE_JSON: HeaderValue = HeaderValue::from_static("application/json");

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str()) || name == header::TRANSFER_ENCODING
}

/// Headers for the upstream request.
///
/// `host` and `content-length` are recomputed by the client for the rewritten
/// body. `accept-encoding` is dropped so the upstream answers uncompressed.
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::ACCEPT_ENCODING
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Headers for the client-facing response.
///
/// `content-length` is kept only when the body is passed through unchanged.
pub fn response_headers(upstream: &HeaderMap, keep_content_length: bool) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) || (!keep_content_length && name == header::CONTENT_LENGTH) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("text/event-stream"))
        .unwrap_or(false)
}

/// Extension trait for inserting Veil headers into responses.
pub trait VeilHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Returns false if the value couldn't be converted to a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl<B> VeilHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers_mut().insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}
