//! Prometheus metrics.
//!
//! All metrics register against the default registry and are exported by the
//! admin `/metrics` endpoint in Prometheus text format.

use std::sync::LazyLock;

use prometheus::{
    IntCounter, IntCounterVec, IntGauge, register_int_counter, register_int_counter_vec,
    register_int_gauge,
};

/// Total sessions created since startup.
pub static SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "streamgate_sessions_created_total",
        "Total number of sessions created"
    )
    .expect("valid metric definition")
});

/// Total sessions closed since startup (explicit DELETE or disconnect).
pub static SESSIONS_CLOSED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "streamgate_sessions_closed_total",
        "Total number of sessions closed"
    )
    .expect("valid metric definition")
});

/// Currently active sessions.
pub static SESSIONS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!(
        "streamgate_sessions_active",
        "Number of currently active sessions"
    )
    .expect("valid metric definition")
});

/// Requests by HTTP method and outcome.
///
/// `outcome` is either "success" or an error type name from
/// `GateError::error_type_name`, keeping cardinality bounded.
pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "streamgate_requests_total",
        "Total requests by HTTP method and outcome",
        &["http_method", "outcome"]
    )
    .expect("valid metric definition")
});

/// Record one request outcome.
pub fn record_request(http_method: &str, outcome: &str) {
    REQUESTS.with_label_values(&[http_method, outcome]).inc();
}
