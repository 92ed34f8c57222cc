//! Prometheus metrics recorder and `/metrics` rendering.
//!
//! Broker-level metric names live in [`uib_broker::metrics`]; the ones here
//! are specific to the WebSocket transport.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket session duration in seconds (histogram, labels: instance).
pub const WS_SESSION_DURATION_SECONDS: &str = "uib_ws_session_duration_seconds";
/// Sessions closed for missing pongs (counter, labels: instance).
pub const WS_HEARTBEAT_TIMEOUTS_TOTAL: &str = "uib_ws_heartbeat_timeouts_total";
/// Frames written to clients (counter, labels: kind).
pub const WS_FRAMES_WRITTEN_TOTAL: &str = "uib_ws_frames_written_total";
/// Inbound frames that failed to parse (counter).
pub const WS_INVALID_FRAMES_TOTAL: &str = "uib_ws_invalid_frames_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        for name in [
            WS_SESSION_DURATION_SECONDS,
            WS_HEARTBEAT_TIMEOUTS_TOTAL,
            WS_FRAMES_WRITTEN_TOTAL,
            WS_INVALID_FRAMES_TOTAL,
        ] {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
