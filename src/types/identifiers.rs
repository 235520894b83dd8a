//! Identifier types for the middleware testbed
//!
//! This module contains the validated entity name, the opaque API key issued by
//! the broker on registration, and the UUID-based follow request identifier.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Rejected entity name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid entity id {0:?}: must be non-empty and contain only lowercase letters and digits")]
pub struct InvalidEntityId(pub String);

/// Name of a device or app registered with the broker
///
/// The broker only accepts lowercase ASCII letters and digits, so the check
/// happens once here and every `EntityId` in the crate is known to be valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(String);

impl EntityId {
    /// Validate and wrap an entity name
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidEntityId> {
        let id = id.into();
        if Self::is_valid(&id) {
            Ok(Self(id))
        } else {
            Err(InvalidEntityId(id))
        }
    }

    /// Whether `id` matches `^[a-z0-9]+$`
    pub fn is_valid(id: &str) -> bool {
        !id.is_empty() && id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    }

    /// Borrow the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = InvalidEntityId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for EntityId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntityId::new(s).map_err(serde::de::Error::custom)
    }
}

/// Credential returned by the broker on registration
///
/// Debug output is redacted so keys do not end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key issued by the broker
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the raw key
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Identifier of a single follow request held by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FollowId(pub Uuid);

impl FollowId {
    /// Create a new random follow ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FollowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FollowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FOLLOW_{}", self.0.simple())
    }
}

impl Serialize for FollowId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FollowId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("FOLLOW_").unwrap_or(&s);
        let uuid = Uuid::parse_str(raw).map_err(serde::de::Error::custom)?;
        Ok(FollowId(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_accepts_lowercase_alphanumerics() {
        assert!(EntityId::new("streetlight0").is_ok());
        assert!(EntityId::new("42").is_ok());
        assert_eq!(EntityId::new("dev1").unwrap().as_str(), "dev1");
    }

    #[test]
    fn test_entity_id_rejects_other_shapes() {
        for bad in ["", "Dev1", "dev-1", "dev_1", "dev 1", "dév"] {
            assert_eq!(EntityId::new(bad), Err(InvalidEntityId(bad.to_string())));
        }
    }

    #[test]
    fn test_entity_id_deserialization_validates() {
        let ok: EntityId = serde_json::from_str("\"app7\"").unwrap();
        assert_eq!(ok.to_string(), "app7");
        assert!(serde_json::from_str::<EntityId>("\"App7\"").is_err());
    }

    #[test]
    fn test_api_key_debug_is_redacted() {
        let key = ApiKey::new("secret");
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
        assert_eq!(key.expose(), "secret");
    }

    #[test]
    fn test_generated_api_keys_differ() {
        assert_ne!(ApiKey::generate(), ApiKey::generate());
    }

    #[test]
    fn test_follow_id_accepts_prefixed_and_raw_forms() {
        let id = FollowId::new();
        let prefixed = serde_json::to_string(&id).unwrap();
        assert!(prefixed.starts_with("\"FOLLOW_"));
        assert_eq!(serde_json::from_str::<FollowId>(&prefixed).unwrap(), id);

        let raw = format!("\"{}\"", id.0);
        assert_eq!(serde_json::from_str::<FollowId>(&raw).unwrap(), id);
    }
}
