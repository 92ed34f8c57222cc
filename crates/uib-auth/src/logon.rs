//! Logon and logoff.
//!
//! ```text
//! Unauthenticated ──logon──▶ Validating ──▶ Authorised
//!                                      └──▶ Failed
//! ```
//!
//! A logon passes four gates in order: security enabled for the instance,
//! secure channel (or development mode), non-empty id, and the injected
//! [`CredentialValidator`]. The first gate to fail ends the attempt with an
//! `authorisation failure` reply and no token.

use async_trait::async_trait;
use tracing::{info, warn};
use uib_core::{AuthInfo, AuthToken, ControlBody};

use crate::token::{ClientMeta, TokenPolicy, create_token};

/// Message attached to a successful logon.
pub const LOGON_SUCCESS_MESSAGE: &str = "Logon successful";

/// Message attached to a logoff confirmation.
pub const LOGOFF_MESSAGE: &str = "Logged off";

/// Where a client is in the logon protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogonState {
    /// No logon attempted, or logged off.
    #[default]
    Unauthenticated,
    /// Credentials are with the validator.
    Validating,
    /// Logon accepted and a token issued.
    Authorised,
    /// Last attempt was rejected.
    Failed,
}

/// Checks credentials supplied with a logon request.
///
/// Implementations are supplied by the embedding application when an
/// instance is created. The returned state must set `validated` to accept
/// the logon; `info.error` may carry a reason for the user.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Validate `auth` (id plus credential fields).
    async fn validate(&self, auth: AuthToken, meta: &ClientMeta) -> AuthToken;
}

/// Validator that rejects every logon. Used when an instance enables
/// security without supplying its own validator.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl CredentialValidator for DenyAll {
    async fn validate(&self, auth: AuthToken, _meta: &ClientMeta) -> AuthToken {
        AuthToken::failure(auth.id, "No credential validator is configured")
    }
}

/// Instance-level rules for a logon attempt.
#[derive(Clone, Debug)]
pub struct LogonPolicy {
    /// Whether the instance has security enabled at all.
    pub security_enabled: bool,
    /// Permit logon over insecure channels.
    pub dev_mode: bool,
    /// Token issue settings.
    pub token: TokenPolicy,
}

/// Result of a logon or logoff step.
#[derive(Clone, Debug, PartialEq)]
pub struct LogonOutcome {
    /// State after the step.
    pub state: LogonState,
    /// Auth state to keep for the session and return to the client.
    pub auth: AuthToken,
}

impl LogonOutcome {
    fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            state: LogonState::Failed,
            auth: AuthToken::failure(id, error),
        }
    }

    /// Control-channel reply for the client.
    pub fn reply(&self) -> ControlBody {
        let auth = self.auth.without_credentials();
        match self.state {
            LogonState::Authorised => ControlBody::Authorised { auth },
            LogonState::Unauthenticated => ControlBody::LoggedOff { auth },
            LogonState::Validating | LogonState::Failed => ControlBody::AuthorisationFailure {
                auth: AuthToken::failure(
                    auth.id,
                    auth.info.error.unwrap_or_else(|| "Logon failed".into()),
                ),
            },
        }
    }
}

/// Run a logon attempt.
pub async fn logon(
    request: AuthToken,
    policy: &LogonPolicy,
    validator: &dyn CredentialValidator,
    meta: &ClientMeta,
) -> LogonOutcome {
    let instance = &policy.token.audience;

    if !policy.security_enabled {
        return LogonOutcome::failed(request.id, "Security is not enabled for this instance");
    }
    if !meta.secure {
        if policy.dev_mode {
            warn!(
                instance = %instance,
                id = %request.id,
                remote = ?meta.remote_address,
                "LOGON OVER AN INSECURE CONNECTION: permitted only because development mode is on"
            );
        } else {
            return LogonOutcome::failed(request.id, "Logon requires a secure connection");
        }
    }
    if request.id.trim().is_empty() {
        return LogonOutcome::failed(request.id, "No user id provided");
    }

    let id = request.id.clone();
    let validated = validator.validate(request, meta).await;
    if !validated.validated || validated.id != id {
        let error = validated
            .info
            .error
            .unwrap_or_else(|| "Invalid credentials".into());
        info!(instance = %instance, id = %id, "logon rejected");
        return LogonOutcome::failed(id, error);
    }

    let issued = create_token(
        &AuthToken {
            info: AuthInfo {
                message: Some(LOGON_SUCCESS_MESSAGE.into()),
                ..AuthInfo::default()
            },
            ..validated
        },
        &policy.token,
        meta,
    );
    if !issued.info.valid_jwt {
        return LogonOutcome {
            state: LogonState::Failed,
            auth: issued,
        };
    }
    info!(instance = %instance, id = %id, "logon accepted");
    LogonOutcome {
        state: LogonState::Authorised,
        auth: issued,
    }
}

/// End a session. Always succeeds and is idempotent.
pub fn logoff(current: &AuthToken) -> LogonOutcome {
    let mut auth = current.cleared();
    auth.info.message = Some(LOGOFF_MESSAGE.into());
    LogonOutcome {
        state: LogonState::Unauthenticated,
        auth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use uib_core::InstanceId;

    use crate::token::check_token;

    struct PasswordIs(&'static str);

    #[async_trait]
    impl CredentialValidator for PasswordIs {
        async fn validate(&self, auth: AuthToken, _meta: &ClientMeta) -> AuthToken {
            let ok = auth.credentials.get("password").and_then(|v| v.as_str()) == Some(self.0);
            if ok {
                AuthToken {
                    validated: true,
                    ..auth
                }
            } else {
                AuthToken::failure(auth.id, "Wrong password")
            }
        }
    }

    fn policy(security_enabled: bool, dev_mode: bool) -> LogonPolicy {
        LogonPolicy {
            security_enabled,
            dev_mode,
            token: TokenPolicy {
                audience: InstanceId::parse("myapp").unwrap(),
                secret: Some("s".into()),
                session_length: Duration::from_secs(600),
                check_ip: false,
            },
        }
    }

    fn secure() -> ClientMeta {
        ClientMeta {
            remote_address: Some("127.0.0.1".into()),
            secure: true,
        }
    }

    fn request(id: &str, password: &str) -> AuthToken {
        let mut auth = AuthToken::anonymous(id);
        let _ = auth
            .credentials
            .insert("password".into(), serde_json::json!(password));
        auth
    }

    #[tokio::test]
    async fn successful_logon_issues_token() {
        let outcome = logon(request("bob", "pw"), &policy(true, false), &PasswordIs("pw"), &secure()).await;
        assert_eq!(outcome.state, LogonState::Authorised);
        assert!(outcome.auth.is_authenticated());
        assert!(outcome.auth.credentials.is_empty());
        assert!(check_token(&outcome.auth, &policy(true, false).token, &secure()).info.valid_jwt);

        assert_matches!(outcome.reply(), ControlBody::Authorised { auth } => {
            assert_eq!(auth.id, "bob");
            assert!(auth.token.is_some());
            assert!(auth.expiry.is_some());
            assert_eq!(auth.info.message.as_deref(), Some(LOGON_SUCCESS_MESSAGE));
        });
    }

    #[tokio::test]
    async fn insecure_channel_rejected_outside_dev_mode() {
        let insecure = ClientMeta {
            secure: false,
            ..secure()
        };
        let outcome = logon(request("bob", "pw"), &policy(true, false), &PasswordIs("pw"), &insecure).await;
        assert_eq!(outcome.state, LogonState::Failed);
        assert!(outcome.auth.token.is_none());
        assert_matches!(outcome.reply(), ControlBody::AuthorisationFailure { auth } => {
            assert!(auth.token.is_none());
            assert!(auth.info.error.is_some());
        });
    }

    #[tokio::test]
    async fn insecure_channel_allowed_in_dev_mode() {
        let insecure = ClientMeta {
            secure: false,
            ..secure()
        };
        let outcome = logon(request("bob", "pw"), &policy(true, true), &PasswordIs("pw"), &insecure).await;
        assert_eq!(outcome.state, LogonState::Authorised);
    }

    #[tokio::test]
    async fn security_disabled_rejects() {
        let outcome = logon(request("bob", "pw"), &policy(false, false), &PasswordIs("pw"), &secure()).await;
        assert_eq!(outcome.state, LogonState::Failed);
    }

    #[tokio::test]
    async fn empty_id_rejected() {
        let outcome = logon(request("  ", "pw"), &policy(true, false), &PasswordIs("pw"), &secure()).await;
        assert_eq!(outcome.state, LogonState::Failed);
        assert_eq!(outcome.auth.info.error.as_deref(), Some("No user id provided"));
    }

    #[tokio::test]
    async fn validator_rejection_carries_reason() {
        let outcome = logon(request("bob", "nope"), &policy(true, false), &PasswordIs("pw"), &secure()).await;
        assert_eq!(outcome.state, LogonState::Failed);
        assert_eq!(outcome.auth.info.error.as_deref(), Some("Wrong password"));
    }

    #[tokio::test]
    async fn deny_all_rejects() {
        let outcome = logon(request("bob", "pw"), &policy(true, false), &DenyAll, &secure()).await;
        assert_eq!(outcome.state, LogonState::Failed);
    }

    #[tokio::test]
    async fn missing_secret_fails_logon() {
        let mut p = policy(true, false);
        p.token.secret = None;
        let outcome = logon(request("bob", "pw"), &p, &PasswordIs("pw"), &secure()).await;
        assert_eq!(outcome.state, LogonState::Failed);
        assert_matches!(outcome.reply(), ControlBody::AuthorisationFailure { .. });
    }

    #[tokio::test]
    async fn logoff_is_idempotent() {
        let outcome = logon(request("bob", "pw"), &policy(true, false), &PasswordIs("pw"), &secure()).await;
        let first = logoff(&outcome.auth);
        let second = logoff(&first.auth);
        assert_eq!(first, second);
        assert_eq!(first.state, LogonState::Unauthenticated);
        assert!(first.auth.token.is_none());
        assert!(!first.auth.validated);
        assert_matches!(first.reply(), ControlBody::LoggedOff { .. });
    }
}
