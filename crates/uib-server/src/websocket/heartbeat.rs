//! Heartbeat liveness monitoring.
//!
//! The session writer sends a `ping` frame every `interval`; the client
//! answers with `pong`. A client that has been silent for longer than
//! `interval + timeout` is considered gone.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use uib_broker::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Silence allowed before a client is dropped.
pub fn liveness_deadline(interval: Duration, timeout: Duration) -> Duration {
    interval.saturating_add(timeout)
}

/// Watch a connection until it misses its pong deadline or `cancel` fires.
///
/// The deadline is checked every `min(interval, timeout)`, so a dead client
/// is detected at most one check period late.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let deadline = liveness_deadline(interval, timeout);
    let period = interval.min(timeout).max(Duration::from_millis(1));
    let mut check_interval = time::interval(period);
    // Skip the immediate first tick
    let _ = check_interval.tick().await;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.last_pong_elapsed() > deadline {
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uib_core::ConnectionId;

    fn make_connection() -> Arc<ClientConnection> {
        let (conn, _rx) = ClientConnection::channel(ConnectionId::from("hb_conn"), 8);
        Arc::new(conn)
    }

    #[test]
    fn deadline_adds_interval_and_timeout() {
        assert_eq!(
            liveness_deadline(Duration::from_secs(25), Duration::from_secs(20)),
            Duration::from_secs(45)
        );
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(conn, Duration::from_secs(100), Duration::from_secs(300), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn silent_client_times_out() {
        let conn = make_connection();
        let result = run_heartbeat(
            conn,
            Duration::from_millis(10),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test]
    async fn answering_client_stays_alive() {
        let conn = make_connection();
        let conn2 = Arc::clone(&conn);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(conn2, Duration::from_millis(50), Duration::from_millis(100), cancel2).await
        });

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            conn.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
