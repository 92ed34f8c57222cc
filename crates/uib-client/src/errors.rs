//! Client error types.

use thiserror::Error;
use uib_core::{TimeoutError, TransportError};

/// Errors surfaced by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The underlying channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An acknowledgement did not arrive in time.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The connection was closed by the application before completion.
    #[error("connection closed")]
    Closed,

    /// The manager task is gone.
    #[error("connection manager stopped")]
    QueueClosed,
}

/// Convenience alias for client results.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn display() {
        assert_eq!(ClientError::Closed.to_string(), "connection closed");
        assert_eq!(
            ClientError::from(TransportError::new("refused")).to_string(),
            "transport error: refused"
        );
        let timeout = ClientError::from(TimeoutError {
            after: Duration::from_secs(1),
        });
        assert!(timeout.to_string().contains("1s"));
    }
}
