//! Communication interfaces between behaviors and the broker
//!
//! # Overview
//!
//! Behaviors run in logical time and must never wait on the network. Each
//! interface is a bounded queue with a dedicated worker task:
//!
//! - **PublishInterface**: device data to `<id>.protected`
//! - **SendCommandsInterface**: app commands to `<device>.configure`
//! - **SubscribeInterface**: bound data from the entity's default queue
//! - **ReceiveCommandsInterface**: commands from the entity's configure queue
//!
//! Inbound delivery polls or consumes a push stream depending on the
//! [`DeliveryStrategy`]. Payloads are decoded once into [`Message`].

pub mod interface;
pub mod message;
pub mod ports;
pub mod publish;
pub mod subscribe;

pub use interface::*;
pub use message::*;
pub use ports::*;
pub use publish::*;
pub use subscribe::*;
