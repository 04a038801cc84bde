//! Prometheus metrics for veil-proxy.
//!
//! Tracks forwarded requests, dictionary substitutions, proxy rotation and
//! upstream authentication failures.
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use tracing::warn;

/// Body rewritten on the way to the upstream
pub const DIRECTION_REQUEST: &str = "request";
/// Buffered upstream body restored on the way back
pub const DIRECTION_RESPONSE: &str = "response";
/// Event-stream chunk restored on the way back
pub const DIRECTION_STREAM: &str = "stream";

pub const PROXY_SELECTED: &str = "selected";
pub const PROXY_FAILED: &str = "failed";
pub const PROXY_SKIPPED: &str = "skipped";

lazy_static! {
    /// Total number of requests processed
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "veil_requests_total",
        "Total number of requests processed by the proxy",
        &["method", "status"]
    )
    .unwrap();

    /// Bodies or chunks in which at least one substitution happened
    pub static ref SUBSTITUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "veil_substitutions_total",
        "Number of bodies and stream chunks rewritten by the dictionaries",
        &["direction"]  // direction: request|response|stream
    )
    .unwrap();

    /// Proxy pool selection attempts
    pub static ref PROXY_SELECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "veil_proxy_selections_total",
        "Proxy pool entries considered during selection",
        &["proxy", "outcome"]  // outcome: selected|failed|skipped
    )
    .unwrap();

    /// Selections where no pool entry was usable
    pub static ref POOL_EXHAUSTED_TOTAL: Counter = register_counter!(
        "veil_pool_exhausted_total",
        "Number of selections in which every proxy in the pool failed"
    )
    .unwrap();

    /// Upstream request duration
    pub static ref UPSTREAM_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "veil_upstream_request_duration_ms",
        "Time until upstream response headers arrive",
        &["route", "status"],  // route: direct|proxy
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0, 60000.0]
    )
    .unwrap();

    /// Upstream 401 responses
    pub static ref AUTH_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "veil_auth_failures_total",
        "Upstream responses with status 401",
        &["method"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Helper to record request processing
pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

pub fn record_substitutions(direction: &str, count: usize) {
    SUBSTITUTIONS_TOTAL
        .with_label_values(&[direction])
        .inc_by(count as f64);
}

pub fn record_proxy_selection(proxy: &str, outcome: &str) {
    PROXY_SELECTIONS_TOTAL
        .with_label_values(&[proxy, outcome])
        .inc();
}

pub fn record_pool_exhausted() {
    POOL_EXHAUSTED_TOTAL.inc();
}

/// Helper to record upstream latency
pub fn record_upstream_duration(route: &str, status: u16, duration_ms: f64) {
    UPSTREAM_REQUEST_DURATION_MS
        .with_label_values(&[route, &status.to_string()])
        .observe(duration_ms);
}

pub fn record_auth_failure(method: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[method]).inc();
}
