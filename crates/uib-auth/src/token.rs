//! Signed session tokens.
//!
//! Tokens are HS256 JWTs signed with the instance secret. Nothing is stored
//! server-side: a token is valid if its signature, issuer, audience and
//! expiry check out, and (optionally) it was issued to the same remote
//! address.
//!
//! Neither [`create_token`] nor [`check_token`] returns an error. Failures
//! are encoded in the returned [`AuthToken`]: `info.validJwt` is false and
//! `info.error` carries a text that does not say which check failed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uib_core::{AuthInfo, AuthToken, InstanceId, SYSTEM_NAME};

use crate::errors::AuthError;

/// Text placed in `info.error` for any rejected token.
pub const INVALID_TOKEN_MESSAGE: &str = "Session is invalid or has expired";

/// Text placed in `info.error` when a token could not be issued.
pub const ISSUE_FAILED_MESSAGE: &str = "Could not create a session token";

/// Signed token payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the authenticated id.
    pub sub: String,
    /// Issuer: always [`SYSTEM_NAME`].
    pub iss: String,
    /// Audience: the instance id.
    pub aud: String,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Remote address at issuance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Per-instance token settings.
#[derive(Clone, Debug)]
pub struct TokenPolicy {
    /// Instance the token is issued for (the audience).
    pub audience: InstanceId,
    /// Signing secret. `None` or empty means tokens cannot be issued.
    pub secret: Option<String>,
    /// How long a freshly issued token lives.
    pub session_length: Duration,
    /// Require the embedded IP to match the connection's address.
    pub check_ip: bool,
}

impl TokenPolicy {
    fn secret(&self) -> Result<&[u8], AuthError> {
        match self.secret.as_deref() {
            Some(s) if !s.is_empty() => Ok(s.as_bytes()),
            _ => Err(AuthError::MissingSecret),
        }
    }
}

/// What the auth layer knows about the connection a request came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientMeta {
    /// Remote address (after proxy resolution).
    pub remote_address: Option<String>,
    /// Whether the connection arrived over a secure channel.
    pub secure: bool,
}

/// Issue a token for `auth` valid for `policy.session_length` from now.
pub fn create_token(auth: &AuthToken, policy: &TokenPolicy, meta: &ClientMeta) -> AuthToken {
    create_token_at(auth, policy, meta, Utc::now())
}

/// Issue a token as if the current time were `now`.
pub fn create_token_at(
    auth: &AuthToken,
    policy: &TokenPolicy,
    meta: &ClientMeta,
    now: DateTime<Utc>,
) -> AuthToken {
    let session = chrono::Duration::from_std(policy.session_length)
        .unwrap_or_else(|_| chrono::Duration::zero());
    let expiry = now + session;

    match sign(auth, policy, meta, expiry) {
        Ok(jwt) => AuthToken {
            id: auth.id.clone(),
            token: Some(jwt),
            expiry: Some(expiry.timestamp_millis()),
            validated: auth.validated,
            info: AuthInfo {
                error: None,
                message: auth.info.message.clone(),
                valid_jwt: true,
            },
            credentials: serde_json::Map::new(),
        },
        Err(err) => {
            warn!(instance = %policy.audience, id = %auth.id, error = %err, "token issue failed");
            AuthToken::failure(auth.id.clone(), ISSUE_FAILED_MESSAGE)
        }
    }
}

fn sign(
    auth: &AuthToken,
    policy: &TokenPolicy,
    meta: &ClientMeta,
    expiry: DateTime<Utc>,
) -> Result<String, AuthError> {
    let secret = policy.secret()?;
    if auth.id.is_empty() {
        return Err(AuthError::MissingId);
    }
    let claims = Claims {
        sub: auth.id.clone(),
        iss: SYSTEM_NAME.to_owned(),
        aud: policy.audience.to_string(),
        exp: expiry.timestamp(),
        ip: meta.remote_address.clone(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(AuthError::Signing)
}

/// Verify the token carried by `auth` against wall-clock time.
///
/// On success the state comes back unchanged apart from `info`
/// (`validJwt = true`, no error). On any failure the token and expiry are
/// cleared and a generic error is set.
pub fn check_token(auth: &AuthToken, policy: &TokenPolicy, meta: &ClientMeta) -> AuthToken {
    match verify(auth, policy, meta) {
        Ok(_) => AuthToken {
            info: AuthInfo {
                error: None,
                message: auth.info.message.clone(),
                valid_jwt: true,
            },
            credentials: serde_json::Map::new(),
            ..auth.clone()
        },
        Err(err) => {
            debug!(instance = %policy.audience, id = %auth.id, error = %err, "token check failed");
            AuthToken::failure(auth.id.clone(), INVALID_TOKEN_MESSAGE)
        }
    }
}

fn verify(auth: &AuthToken, policy: &TokenPolicy, meta: &ClientMeta) -> Result<Claims, AuthError> {
    let secret = policy.secret()?;
    let jwt = auth.token.as_deref().ok_or(AuthError::MissingToken)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_issuer(&[SYSTEM_NAME]);
    validation.set_audience(&[policy.audience.as_str()]);
    validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

    let data = jsonwebtoken::decode::<Claims>(jwt, &DecodingKey::from_secret(secret), &validation)
        .map_err(AuthError::Rejected)?;
    let claims = data.claims;

    if claims.sub != auth.id {
        return Err(AuthError::SubjectMismatch);
    }
    if policy.check_ip && claims.ip != meta.remote_address {
        return Err(AuthError::IpMismatch {
            issued: claims.ip,
            current: meta.remote_address.clone(),
        });
    }
    Ok(claims)
}

/// Check the token and, if it is still valid, re-issue it with a fresh
/// expiry (sliding session).
pub fn refresh_token(auth: &AuthToken, policy: &TokenPolicy, meta: &ClientMeta) -> AuthToken {
    let checked = check_token(auth, policy, meta);
    if checked.info.valid_jwt {
        create_token(&checked, policy, meta)
    } else {
        checked
    }
}
