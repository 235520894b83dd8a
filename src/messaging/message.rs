//! Wire envelopes and decoded messages
//!
//! Payloads leave the broker as raw JSON inside an [`Envelope`]. They are decoded
//! exactly once, by the interface worker that received them, into the closed
//! [`Message`] sum type. Behavior code never sees untyped JSON.

use crate::types::{EntityId, Stream};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Raw message as stored and delivered by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Entity that published the payload
    pub sender: EntityId,
    /// Stream the payload was published on, if the broker reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<Stream>,
    /// Opaque JSON payload
    pub payload: Value,
}

/// Command carried on a device's configure stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Leave the FAULT state
    Resume,
    /// Any other command string, passed through untouched
    Other(String),
}

impl Command {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Command::Resume => "RESUME",
            Command::Other(other) => other,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        match s {
            "RESUME" => Command::Resume,
            other => Command::Other(other.to_string()),
        }
    }
}

impl Serialize for Command {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Command::from(s.as_str()))
    }
}

/// Marker for the only status value devices report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultMarker {
    /// `"status": "FAULT"`
    #[serde(rename = "FAULT")]
    Fault,
}

fn unknown_fault_type() -> String {
    "unknown".to_string()
}

/// Decoded application message
///
/// Variants are distinguished by their payload keys: `command`, `status`,
/// `sensor_value` or the streetlight sensor set. Anything else fails to decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Command for a device
    Command {
        /// Issuing entity
        sender: EntityId,
        /// Command to execute
        command: Command,
    },
    /// Device reporting that it entered FAULT
    FaultStatus {
        /// Faulty device
        sender: EntityId,
        /// Always FAULT
        status: FaultMarker,
        /// Fault classification, `unknown` when the device cannot tell
        #[serde(rename = "type", default = "unknown_fault_type")]
        fault_type: String,
    },
    /// Periodic sensor sample
    SensorReading {
        /// Publishing device
        sender: EntityId,
        /// Sampled value
        sensor_value: f64,
    },
    /// Periodic or activity-triggered streetlight sample
    StreetlightReading {
        /// Publishing streetlight
        sender: EntityId,
        /// Ambient light level in `[0, 1]`
        ambient_light_intensity: f64,
        /// LED output level, 0 when off
        led_light_intensity: f64,
        /// Whether the sample was triggered by the light's own activity sensor
        activity_detected: bool,
    },
}

impl Message {
    /// Build a sensor reading
    pub fn sensor_reading(sender: &EntityId, sensor_value: f64) -> Self {
        Message::SensorReading { sender: sender.clone(), sensor_value }
    }

    /// Build a streetlight sample
    pub fn streetlight_reading(
        sender: &EntityId,
        ambient_light_intensity: f64,
        led_light_intensity: f64,
        activity_detected: bool,
    ) -> Self {
        Message::StreetlightReading {
            sender: sender.clone(),
            ambient_light_intensity,
            led_light_intensity,
            activity_detected,
        }
    }

    /// Build an unclassified fault report
    pub fn fault_status(sender: &EntityId) -> Self {
        Message::FaultStatus {
            sender: sender.clone(),
            status: FaultMarker::Fault,
            fault_type: unknown_fault_type(),
        }
    }

    /// Build a command
    pub fn command(sender: &EntityId, command: Command) -> Self {
        Message::Command { sender: sender.clone(), command }
    }

    /// Entity named inside the payload
    pub fn sender(&self) -> &EntityId {
        match self {
            Message::Command { sender, .. }
            | Message::FaultStatus { sender, .. }
            | Message::SensorReading { sender, .. }
            | Message::StreetlightReading { sender, .. } => sender,
        }
    }

    /// Short variant name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Command { .. } => "command",
            Message::FaultStatus { .. } => "fault_status",
            Message::SensorReading { .. } => "sensor_reading",
            Message::StreetlightReading { .. } => "streetlight_reading",
        }
    }

    /// Encode into a broker payload
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode a broker payload
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        Message::deserialize(payload)
    }
}

/// Message handed to behavior code by a subscribe-side interface
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Entity the broker attributed the message to
    pub from: EntityId,
    /// Stream the message arrived on, if known
    pub stream: Option<Stream>,
    /// Decoded content
    pub message: Message,
}

impl InboundMessage {
    /// Decode an envelope, keeping the broker's view of the sender
    pub fn decode(envelope: Envelope) -> Result<Self, serde_json::Error> {
        let message = Message::from_payload(&envelope.payload)?;
        Ok(Self { from: envelope.sender, stream: envelope.stream, message })
    }
}
