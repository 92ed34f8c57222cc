//! Auth error types.
//!
//! These never reach a client verbatim. Token operations fold them into
//! [`uib_core::AuthInfo::error`] with a generic text and log the detail.

/// Reasons a token could not be issued or accepted.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The instance has no signing secret configured.
    #[error("no signing secret configured")]
    MissingSecret,

    /// The auth state has an empty subject.
    #[error("auth state has no id")]
    MissingId,

    /// The auth state carries no token to check.
    #[error("auth state has no token")]
    MissingToken,

    /// Signing failed.
    #[error("token signing failed: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// Signature, issuer, audience or expiry check failed.
    #[error("token rejected: {0}")]
    Rejected(#[source] jsonwebtoken::errors::Error),

    /// Token subject differs from the presented id.
    #[error("token subject does not match id")]
    SubjectMismatch,

    /// Token was issued to a different remote address.
    #[error("token ip {issued:?} does not match connection ip {current:?}")]
    IpMismatch {
        /// Address embedded at issuance.
        issued: Option<String>,
        /// Address of the current connection.
        current: Option<String>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_secret_display() {
        assert_eq!(
            AuthError::MissingSecret.to_string(),
            "no signing secret configured"
        );
    }

    #[test]
    fn ip_mismatch_display() {
        let err = AuthError::IpMismatch {
            issued: Some("10.0.0.1".into()),
            current: None,
        };
        assert_eq!(
            err.to_string(),
            "token ip Some(\"10.0.0.1\") does not match connection ip None"
        );
    }
}
