//! Enumeration types for the middleware testbed
//!
//! This module contains entity kinds, permission modes, stream names and the
//! behavior states shared across the setup protocol, the interfaces and the
//! behavior engine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Kind of a registered entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Sensor or actuator that publishes data and accepts commands
    Device,
    /// Consumer that subscribes to device data and issues commands
    App,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Device => write!(f, "device"),
            EntityKind::App => write!(f, "app"),
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device" => Ok(EntityKind::Device),
            "app" | "application" => Ok(EntityKind::App),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// A single direction of access granted by one follow request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRight {
    /// Receive the target's protected stream
    Read,
    /// Send commands to the target's configure stream
    Write,
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRight::Read => write!(f, "read"),
            AccessRight::Write => write!(f, "write"),
        }
    }
}

/// Mode of a declared permission
///
/// Wire strings are case-sensitive: `read`, `write`, `read-write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionMode {
    /// Requester may read the target's data
    Read,
    /// Requester may command the target
    Write,
    /// Both; produces two independent follow requests
    ReadWrite,
}

impl PermissionMode {
    /// Access rights granted by this mode, in the order the broker creates
    /// their follow requests
    pub fn rights(self) -> &'static [AccessRight] {
        match self {
            PermissionMode::Read => &[AccessRight::Read],
            PermissionMode::Write => &[AccessRight::Write],
            PermissionMode::ReadWrite => &[AccessRight::Read, AccessRight::Write],
        }
    }

    /// Whether the requester gets the target's data stream
    pub fn includes_read(self) -> bool {
        matches!(self, PermissionMode::Read | PermissionMode::ReadWrite)
    }

    /// Whether the requester may send commands to the target
    pub fn includes_write(self) -> bool {
        matches!(self, PermissionMode::Write | PermissionMode::ReadWrite)
    }

    /// Wire representation
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Read => "read",
            PermissionMode::Write => "write",
            PermissionMode::ReadWrite => "read-write",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(PermissionMode::Read),
            "write" => Ok(PermissionMode::Write),
            "read-write" => Ok(PermissionMode::ReadWrite),
            _ => Err(format!("Unknown permission mode: {} (expected read, write or read-write)", s)),
        }
    }
}

impl Serialize for PermissionMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PermissionMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Named channel scoped to an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stream {
    /// Data visible to approved followers
    Protected,
    /// Data visible to everyone
    Public,
    /// Commands addressed to the owner
    Configure,
    /// Any other stream name
    Named(String),
}

impl Stream {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Stream::Protected => "protected",
            Stream::Public => "public",
            Stream::Configure => "configure",
            Stream::Named(name) => name,
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("Stream name must not be empty".to_string()),
            "protected" => Ok(Stream::Protected),
            "public" => Ok(Stream::Public),
            "configure" => Ok(Stream::Configure),
            other => Ok(Stream::Named(other.to_string())),
        }
    }
}

impl Serialize for Stream {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Stream {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Behavior state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityState {
    /// Publishing sensor data and handling commands
    Normal,
    /// Waiting for a RESUME command
    Fault,
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityState::Normal => write!(f, "NORMAL"),
            EntityState::Fault => write!(f, "FAULT"),
        }
    }
}

/// What a device senses and publishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceModel {
    /// Publishes a running count as its sensor value
    #[default]
    Counter,
    /// Ambient-light driven LED with an activity sensor
    Streetlight,
}

impl DeviceModel {
    /// Configuration string
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceModel::Counter => "counter",
            DeviceModel::Streetlight => "streetlight",
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "counter" => Ok(DeviceModel::Counter),
            "streetlight" => Ok(DeviceModel::Streetlight),
            _ => Err(format!("Unknown device model: {} (expected counter or streetlight)", s)),
        }
    }
}

/// Lifecycle of a follow request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowStatus {
    /// Created by `follow`, not yet shared by the target
    Pending,
    /// Shared by the target
    Approved,
}

impl fmt::Display for FollowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FollowStatus::Pending => write!(f, "pending"),
            FollowStatus::Approved => write!(f, "approved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_mode_wire_strings_are_case_sensitive() {
        assert_eq!("read".parse::<PermissionMode>(), Ok(PermissionMode::Read));
        assert_eq!("write".parse::<PermissionMode>(), Ok(PermissionMode::Write));
        assert_eq!("read-write".parse::<PermissionMode>(), Ok(PermissionMode::ReadWrite));
        assert!("Read".parse::<PermissionMode>().is_err());
        assert!("readwrite".parse::<PermissionMode>().is_err());
        assert!("admin".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn test_read_write_expands_to_read_then_write() {
        assert_eq!(PermissionMode::ReadWrite.rights(), &[AccessRight::Read, AccessRight::Write]);
        assert!(PermissionMode::ReadWrite.includes_read());
        assert!(PermissionMode::ReadWrite.includes_write());
        assert!(!PermissionMode::Write.includes_read());
        assert!(!PermissionMode::Read.includes_write());
    }

    #[test]
    fn test_stream_parsing() {
        assert_eq!("protected".parse::<Stream>(), Ok(Stream::Protected));
        assert_eq!("configure".parse::<Stream>(), Ok(Stream::Configure));
        assert_eq!("diagnostics".parse::<Stream>(), Ok(Stream::Named("diagnostics".into())));
        assert!("".parse::<Stream>().is_err());
    }

    #[test]
    fn test_device_model_parsing() {
        assert_eq!("streetlight".parse::<DeviceModel>(), Ok(DeviceModel::Streetlight));
        assert_eq!("Counter".parse::<DeviceModel>(), Ok(DeviceModel::Counter));
        assert!("lamp".parse::<DeviceModel>().is_err());
        assert_eq!(DeviceModel::default(), DeviceModel::Counter);
    }

    #[test]
    fn test_entity_state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&EntityState::Fault).unwrap(), "\"FAULT\"");
        assert_eq!(EntityState::Normal.to_string(), "NORMAL");
    }
}
