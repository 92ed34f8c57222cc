//! Metric names recorded by the broker.
//!
//! Every metric carries an `instance` label. The recorder is installed by
//! the binary; without one these calls are no-ops.

/// Client sessions established (counter).
pub const CONNECTIONS_TOTAL: &str = "uib_connections_total";
/// Client sessions ended (counter).
pub const DISCONNECTIONS_TOTAL: &str = "uib_disconnections_total";
/// Live client sessions (gauge).
pub const CONNECTIONS_ACTIVE: &str = "uib_connections_active";
/// Connections refused by middleware (counter).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "uib_connections_rejected_total";
/// Messages received from clients (counter).
pub const MESSAGES_RECEIVED_TOTAL: &str = "uib_messages_received_total";
/// Messages forwarded to the backend sink (counter).
pub const MESSAGES_FORWARDED_TOTAL: &str = "uib_messages_forwarded_total";
/// Messages enqueued for clients (counter).
pub const MESSAGES_SENT_TOTAL: &str = "uib_messages_sent_total";
/// Messages dropped because a client queue was full (counter).
pub const MESSAGES_DROPPED_TOTAL: &str = "uib_messages_dropped_total";
/// Rejected logons and token checks (counter).
pub const AUTH_FAILURES_TOTAL: &str = "uib_auth_failures_total";
/// Hook errors and panics (counter, labels: instance, hook).
pub const HOOK_FAILURES_TOTAL: &str = "uib_hook_failures_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            CONNECTIONS_TOTAL,
            DISCONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            CONNECTIONS_REJECTED_TOTAL,
            MESSAGES_RECEIVED_TOTAL,
            MESSAGES_FORWARDED_TOTAL,
            MESSAGES_SENT_TOTAL,
            MESSAGES_DROPPED_TOTAL,
            AUTH_FAILURES_TOTAL,
            HOOK_FAILURES_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
