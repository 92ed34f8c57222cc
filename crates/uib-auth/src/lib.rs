//! # uib-auth
//!
//! Stateless session tokens for instances with security enabled.
//!
//! - [`token`]: issue, check and refresh signed tokens
//! - [`logon`]: logon/logoff state machine and the credential validator hook
//! - [`errors`]: internal failure reasons (logged, never sent to clients)
//!
//! Everything here is a pure function over [`uib_core::AuthToken`] values
//! and is safe to call from any task without locking.

#![deny(unsafe_code)]

pub mod errors;
pub mod logon;
pub mod token;

pub use errors::AuthError;
pub use logon::{
    CredentialValidator, DenyAll, LogonOutcome, LogonPolicy, LogonState, logoff, logon,
};
pub use token::{
    ClientMeta, Claims, TokenPolicy, check_token, create_token, create_token_at, refresh_token,
};
