//! Branded ID newtypes.
//!
//! A [`ConnectionId`] names one physical transport connection and never
//! survives a reconnect. A [`ClientId`] names the browser session and is
//! persisted in a durable cookie, so it is random (UUID v4) rather than
//! time-ordered.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $generate:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID.
            #[must_use]
            pub fn new() -> Self {
                Self($generate)
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id!(
    /// Ephemeral id of one transport connection (new on every connect).
    ConnectionId,
    Uuid::now_v7().simple().to_string()
);

branded_id!(
    /// Durable browser identity, kept across reconnects via cookie.
    ClientId,
    Uuid::new_v4().simple().to_string()
);

impl ClientId {
    /// Accept an id read back from a cookie.
    ///
    /// Anything that is not a short run of hex digits or dashes is
    /// discarded so a tampered cookie cannot inject group names.
    pub fn from_cookie(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        let valid = !trimmed.is_empty()
            && trimmed.len() <= 64
            && trimmed.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
        valid.then(|| Self(trimmed.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
        assert_ne!(ClientId::new(), ClientId::new());
    }

    #[test]
    fn serde_is_transparent() {
        let id = ClientId::from("abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc123\"");
        let back: ClientId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_and_deref() {
        let id = ConnectionId::from("c1");
        assert_eq!(id.to_string(), "c1");
        assert_eq!(&*id, "c1");
        assert_eq!(id.as_str(), "c1");
    }

    #[test]
    fn cookie_accepts_generated_ids() {
        let id = ClientId::new();
        assert_eq!(ClientId::from_cookie(id.as_str()), Some(id));
    }

    #[test]
    fn cookie_rejects_garbage() {
        assert!(ClientId::from_cookie("").is_none());
        assert!(ClientId::from_cookie("pageName:evil").is_none());
        assert!(ClientId::from_cookie(&"a".repeat(65)).is_none());
    }
}
