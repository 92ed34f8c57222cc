//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;
use uib_broker::DomainStats;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connected clients across every instance.
    pub connections: usize,
    /// Per-instance counters.
    pub instances: Vec<DomainStats>,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, instances: Vec<DomainStats>) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: instances.iter().map(|s| s.clients).sum(),
        instances,
    }
}
