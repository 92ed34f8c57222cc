//! Error types shared across crates.
//!
//! Auth failures and domain errors live in their own crates
//! (`uib-auth`, `uib-broker`); this module only holds the kinds that both
//! the gateway and the client need to name.

use std::time::Duration;

use thiserror::Error;

/// Malformed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Identifier was empty.
    #[error("instance id must not be empty")]
    Empty,
    /// Identifier longer than allowed.
    #[error("instance id is {len} characters, maximum is {max}")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Maximum length.
        max: usize,
    },
    /// Identifier contained `..`.
    #[error("instance id must not contain '..'")]
    ParentTraversal,
    /// Identifier contained a path separator.
    #[error("instance id must not contain '/'")]
    PathSeparator,
    /// Identifier contained a character that is not URL-safe.
    #[error("instance id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Underlying channel failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {reason}")]
pub struct TransportError {
    /// Human-readable reason.
    pub reason: String,
    /// Optional extra context (peer address, close code, ...).
    pub context: Option<String>,
}

impl TransportError {
    /// Create a transport error without context.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            context: None,
        }
    }

    /// Attach context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// An acknowledgement did not arrive in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("acknowledgement not received within {after:?}")]
pub struct TimeoutError {
    /// The timeout that elapsed.
    pub after: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let err = ValidationError::TooLong { len: 25, max: 20 };
        assert_eq!(err.to_string(), "instance id is 25 characters, maximum is 20");
        assert_eq!(
            ValidationError::InvalidCharacter('?').to_string(),
            "instance id contains invalid character '?'"
        );
    }

    #[test]
    fn transport_error_context() {
        let err = TransportError::new("connection reset").with_context("peer 10.0.0.1");
        assert_eq!(err.to_string(), "transport error: connection reset");
        assert_eq!(err.context.as_deref(), Some("peer 10.0.0.1"));
    }

    #[test]
    fn timeout_display() {
        let err = TimeoutError {
            after: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("1.5s"));
    }
}
