//! Metrics collection and export for chatline.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "chatline_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "chatline_sessions_active";
    pub const SESSIONS_CLOSED: &str = "chatline_sessions_closed_total";
    pub const HANDSHAKE_FAILURES: &str = "chatline_handshake_failures_total";
    pub const USERS_ONLINE: &str = "chatline_users_online";
    pub const DELIVERIES_TOTAL: &str = "chatline_deliveries_total";
    pub const ACK_LATENCY_SECONDS: &str = "chatline_ack_latency_seconds";
    pub const MESSAGES_POSTED: &str = "chatline_messages_posted_total";
    pub const RATE_LIMITED: &str = "chatline_rate_limited_total";
    pub const ERRORS_TOTAL: &str = "chatline_errors_total";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions sent before a recorder is installed are dropped, so this
/// runs after [`start_metrics_server`] has installed the exporter.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of live-update connections since server start"
    );
    metrics::describe_gauge!(
        names::SESSIONS_ACTIVE,
        "Current number of live-update sessions"
    );
    metrics::describe_counter!(names::SESSIONS_CLOSED, "Sessions closed, by reason");
    metrics::describe_counter!(
        names::HANDSHAKE_FAILURES,
        "Handshakes rejected because the signature did not verify"
    );
    metrics::describe_gauge!(names::USERS_ONLINE, "Authenticated users online");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Acknowledged pushes, by kind");
    metrics::describe_histogram!(
        names::ACK_LATENCY_SECONDS,
        "Time from push to client acknowledgement in seconds"
    );
    metrics::describe_counter!(names::MESSAGES_POSTED, "Messages posted over HTTP");
    metrics::describe_counter!(names::RATE_LIMITED, "HTTP requests rejected by the rate limiter");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    init_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new session.
pub fn record_session_opened() {
    counter!(names::SESSIONS_TOTAL).increment(1);
    gauge!(names::SESSIONS_ACTIVE).increment(1.0);
}

/// Record a session end.
pub fn record_session_closed() {
    gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
}

/// Record why a session closed.
pub fn record_close_reason(reason: &'static str) {
    counter!(names::SESSIONS_CLOSED, "reason" => reason).increment(1);
}

/// Record a rejected signature.
pub fn record_handshake_failure() {
    counter!(names::HANDSHAKE_FAILURES).increment(1);
}

/// Update the online user count.
pub fn set_users_online(count: usize) {
    gauge!(names::USERS_ONLINE).set(count as f64);
}

/// Record an acknowledged push.
pub fn record_delivery(kind: &'static str, ack_seconds: f64) {
    counter!(names::DELIVERIES_TOTAL, "kind" => kind).increment(1);
    histogram!(names::ACK_LATENCY_SECONDS).record(ack_seconds);
}

/// Record a message posted over HTTP.
pub fn record_message_posted() {
    counter!(names::MESSAGES_POSTED).increment(1);
}

/// Record a rate-limited request.
pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records session end on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new() -> Self {
        record_session_opened();
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        record_session_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // Without an installed recorder these are no-ops; they must not panic.
        let _guard = SessionMetricsGuard::new();
        record_delivery("message", 0.01);
        record_close_reason("cancelled");
    }

    #[test]
    fn test_descriptions_reach_installed_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            init_metrics();
            record_session_opened();
        });

        let rendered = handle.render();
        assert!(rendered.contains("# HELP chatline_sessions_total"), "{rendered}");
        assert!(rendered.contains("# HELP chatline_sessions_active"), "{rendered}");
    }
}
