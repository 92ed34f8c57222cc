//! The `_auth` value exchanged on the control channel.
//!
//! An [`AuthToken`] is an immutable snapshot of a client's authentication
//! state. Every step of the token lifecycle (`create`, `check`, `logon`,
//! `logoff`) returns a fresh value instead of mutating a shared one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Diagnostic block attached to every [`AuthToken`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    /// Human-readable failure reason. Never names the check that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human-readable success message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Whether the embedded token passed signature and claim checks.
    #[serde(default)]
    pub valid_jwt: bool,
}

/// A client's authentication state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    /// Subject of the token (the user id presented at logon).
    #[serde(default)]
    pub id: String,
    /// Signed opaque token.
    #[serde(rename = "jwt", default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Expiry as epoch milliseconds.
    #[serde(rename = "sessionExpiry", default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    /// Whether the credentials were accepted by the validator.
    #[serde(default)]
    pub validated: bool,
    /// Diagnostics.
    #[serde(default)]
    pub info: AuthInfo,
    /// Credential fields supplied by the client (password, one-time code,
    /// ...). Only the credential validator reads these; they are never
    /// echoed back.
    #[serde(flatten)]
    pub credentials: Map<String, Value>,
}

impl AuthToken {
    /// An unauthenticated state for `id`.
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// A failed state for `id` carrying only the error text.
    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            info: AuthInfo {
                error: Some(error.into()),
                ..AuthInfo::default()
            },
            ..Self::default()
        }
    }

    /// Copy without token, expiry, validation or credentials.
    #[must_use]
    pub fn cleared(&self) -> Self {
        Self::anonymous(self.id.clone())
    }

    /// Copy without the client-supplied credential fields.
    #[must_use]
    pub fn without_credentials(&self) -> Self {
        Self {
            credentials: Map::new(),
            ..self.clone()
        }
    }

    /// Whether the state carries a token that last validated.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.info.valid_jwt
    }
}
