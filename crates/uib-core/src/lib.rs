//! # uib-core
//!
//! Foundation types shared by every uibuilder crate:
//!
//! - [`ids`]: branded connection and client identifiers
//! - [`instance`]: validated instance ids (one per mount point)
//! - [`protocol`]: the control-channel message contract (`uibuilderCtrl`)
//! - [`auth`]: the `_auth` value carried on the control channel
//! - [`frame`]: JSON frames exchanged over the transport and payload packing
//! - [`backoff`]: reconnection delay math
//! - [`errors`]: validation, transport and timeout errors
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod auth;
pub mod backoff;
pub mod errors;
pub mod frame;
pub mod ids;
pub mod instance;
pub mod logging;
pub mod protocol;

pub use auth::{AuthInfo, AuthToken};
pub use backoff::BackoffPolicy;
pub use errors::{TimeoutError, TransportError, ValidationError};
pub use frame::{Frame, WireMessage, estimate_size, pack_prefix};
pub use ids::{ClientId, ConnectionId};
pub use instance::InstanceId;
pub use protocol::{Channel, ClientSessionSnapshot, ControlBody, ControlMessage, Origin};

/// Fixed issuer name stamped into every session token.
pub const SYSTEM_NAME: &str = "uibuilder";

/// Cookie carrying the durable client id, scoped to the instance path.
pub const CLIENT_ID_COOKIE: &str = "uibuilder-client-id";

/// Protocol version reported in `client connect` control messages.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _ = ConnectionId::new();
        let _ = ClientId::new();
        let _ = BackoffPolicy::default();
        assert!(InstanceId::parse("myapp").is_ok());
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!PROTOCOL_VERSION.is_empty());
        assert_eq!(SYSTEM_NAME, "uibuilder");
    }
}
