//! Instance identifiers.
//!
//! An instance id doubles as the URL path segment of its mount point, so it
//! must be short and URL-safe.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::ValidationError;

/// Maximum length of an instance id.
pub const MAX_INSTANCE_ID_LEN: usize = 20;

/// A validated instance id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Validate and wrap an id.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }
        let len = raw.chars().count();
        if len > MAX_INSTANCE_ID_LEN {
            return Err(ValidationError::TooLong {
                len,
                max: MAX_INSTANCE_ID_LEN,
            });
        }
        if raw.contains("..") {
            return Err(ValidationError::ParentTraversal);
        }
        if raw.contains('/') {
            return Err(ValidationError::PathSeparator);
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(ValidationError::InvalidCharacter(bad));
        }
        Ok(Self(raw.to_owned()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URL path the instance is mounted at (`/<id>/`).
    pub fn mount_path(&self) -> String {
        format!("/{}/", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<&str> for InstanceId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_simple_ids() {
        for id in ["myapp", "my-app_2", "a.b", "x"] {
            assert!(InstanceId::parse(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_empty() {
        assert_matches!(InstanceId::parse(""), Err(ValidationError::Empty));
    }

    #[test]
    fn rejects_long() {
        let long = "a".repeat(21);
        assert_matches!(
            InstanceId::parse(&long),
            Err(ValidationError::TooLong { len: 21, max: 20 })
        );
        assert!(InstanceId::parse(&"a".repeat(20)).is_ok());
    }

    #[test]
    fn rejects_traversal_and_slash() {
        assert_matches!(InstanceId::parse("a..b"), Err(ValidationError::ParentTraversal));
        assert_matches!(InstanceId::parse("a/b"), Err(ValidationError::PathSeparator));
    }

    #[test]
    fn rejects_unsafe_characters() {
        assert_matches!(
            InstanceId::parse("a b"),
            Err(ValidationError::InvalidCharacter(' '))
        );
        assert_matches!(
            InstanceId::parse("a?b"),
            Err(ValidationError::InvalidCharacter('?'))
        );
    }

    #[test]
    fn mount_path() {
        let id = InstanceId::parse("myapp").unwrap();
        assert_eq!(id.mount_path(), "/myapp/");
    }

    #[test]
    fn deserialize_validates() {
        let ok: InstanceId = serde_json::from_str("\"myapp\"").unwrap();
        assert_eq!(ok.as_str(), "myapp");
        assert!(serde_json::from_str::<InstanceId>("\"../etc\"").is_err());
    }
}
