//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: code).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Connections closed for missing liveness replies (counter).
pub const LIVENESS_TIMEOUTS_TOTAL: &str = "liveness_timeouts_total";
/// Connections closed for undecodable frames (counter).
pub const DECODE_ERRORS_TOTAL: &str = "decode_errors_total";
/// Rejected credentials at upgrade or subscribe time (counter, labels: endpoint).
pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
/// Envelopes routed (counter, labels: kind).
pub const MESSAGES_TOTAL: &str = "hub_messages_total";
/// Envelopes abandoned (counter, labels: reason).
pub const MESSAGES_FAILED_TOTAL: &str = "hub_messages_failed_total";
/// Frames queued to live connections (counter).
pub const DELIVERIES_TOTAL: &str = "hub_deliveries_total";
/// Frames skipped because a recipient was unreachable (counter).
pub const DELIVERY_DROPS_TOTAL: &str = "hub_delivery_drops_total";
/// Failed bridge pings (counter).
pub const BRIDGE_FAILURES_TOTAL: &str = "bridge_failures_total";
/// Envelopes with a kind outside the known set (counter).
pub const UNKNOWN_KINDS_TOTAL: &str = "hub_unknown_kinds_total";
/// Presence rows removed by the expiry sweep (counter).
pub const PRESENCE_SWEPT_TOTAL: &str = "presence_swept_total";
/// Users with a live connection on this instance (gauge).
pub const REGISTRY_ENTRIES: &str = "registry_entries";
/// Connections closed because the same user connected again (counter).
pub const SUPERSEDED_TOTAL: &str = "ws_superseded_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // no global install, other tests may record concurrently
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            LIVENESS_TIMEOUTS_TOTAL,
            DECODE_ERRORS_TOTAL,
            AUTH_FAILURES_TOTAL,
            MESSAGES_TOTAL,
            MESSAGES_FAILED_TOTAL,
            DELIVERIES_TOTAL,
            DELIVERY_DROPS_TOTAL,
            BRIDGE_FAILURES_TOTAL,
            UNKNOWN_KINDS_TOTAL,
            PRESENCE_SWEPT_TOTAL,
            REGISTRY_ENTRIES,
            SUPERSEDED_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name} is not snake_case"
            );
        }
    }
}
