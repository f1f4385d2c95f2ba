//! Prometheus metrics endpoint
//!
//! Exposes relay metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

use crate::proxy::RelayState;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    // Force initialization of the lazy static
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "chat_relay_requests_total",
        "Total number of proxied requests by route and outcome"
    );
    metrics::describe_histogram!(
        "chat_relay_request_duration_seconds",
        "Time until the request (or its stream) finished, in seconds"
    );
    metrics::describe_gauge!(
        "chat_relay_active_streams",
        "Number of chat responses currently being relayed"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a finished request
pub fn record_request(route: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "chat_relay_requests_total",
        "route" => route.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!("chat_relay_request_duration_seconds", "route" => route.to_string())
        .record(duration_secs);
}

/// Record how a relayed chat stream ended
pub fn record_stream_end(state: RelayState, duration_secs: f64) {
    record_request("chat_stream", state.as_str(), duration_secs);
}

/// Keeps `chat_relay_active_streams` raised while alive
#[must_use]
pub struct ActiveStreamGuard(());

/// Count a stream as active until the returned guard is dropped
pub fn track_active_stream() -> ActiveStreamGuard {
    metrics::gauge!("chat_relay_active_streams").increment(1.0);
    ActiveStreamGuard(())
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        metrics::gauge!("chat_relay_active_streams").decrement(1.0);
    }
}
