//! Broker error types.

use thiserror::Error;
use uib_core::{InstanceId, ValidationError};

/// Errors returned synchronously by the broker's public API.
///
/// Auth and transport failures are not here: those are reported to the
/// affected client on the control channel and logged.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// `create_domain` was called twice for the same instance.
    #[error("routing domain for instance '{0}' already exists")]
    DomainExists(InstanceId),

    /// No live domain for the instance.
    #[error("no routing domain for instance '{0}'")]
    DomainNotFound(InstanceId),

    /// Connection middleware refused the session.
    #[error("connection rejected: {0}")]
    SessionRejected(String),

    /// Malformed instance id.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_exists_display() {
        let err = BrokerError::DomainExists(InstanceId::parse("myapp").unwrap());
        assert_eq!(
            err.to_string(),
            "routing domain for instance 'myapp' already exists"
        );
    }

    #[test]
    fn validation_is_transparent() {
        let err = BrokerError::from(ValidationError::ParentTraversal);
        assert_eq!(err.to_string(), "instance id must not contain '..'");
    }
}
