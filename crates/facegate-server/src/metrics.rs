//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because the connection cap was reached (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Admitted requests total (counter, labels: kind).
pub const GATEWAY_REQUESTS_TOTAL: &str = "gateway_requests_total";
/// Requests rejected as Busy (counter, labels: kind).
pub const GATEWAY_BUSY_TOTAL: &str = "gateway_busy_total";
/// Requests that hit their deadline (counter, labels: kind).
pub const GATEWAY_TIMEOUTS_TOTAL: &str = "gateway_timeouts_total";
/// Backend failures (counter, labels: kind, category).
pub const GATEWAY_BACKEND_ERRORS_TOTAL: &str = "gateway_backend_errors_total";
/// Inbound messages dropped as undecodable (counter).
pub const GATEWAY_DECODE_ERRORS_TOTAL: &str = "gateway_decode_errors_total";
/// Results discarded because the connection was gone or not writable (counter, labels: reason).
pub const GATEWAY_RESULTS_DROPPED_TOTAL: &str = "gateway_results_dropped_total";
/// Successful backend round-trip seconds (histogram, labels: kind).
pub const GATEWAY_REQUEST_DURATION_SECONDS: &str = "gateway_request_duration_seconds";
/// Backend retries (counter, labels: kind).
pub const BACKEND_RETRIES_TOTAL: &str = "backend_retries_total";
/// Passthrough REST calls (counter, labels: route, outcome).
pub const PROXY_REQUESTS_TOTAL: &str = "proxy_requests_total";
