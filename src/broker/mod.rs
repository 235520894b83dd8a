//! Broker client abstraction and in-memory middleware
//!
//! # Overview
//!
//! - **BrokerClient**: async contract for every middleware call
//! - **BrokerConnector**: hands out one independent connection per caller
//! - **InMemoryBroker**: in-process middleware used by the CLI and the tests
//!
//! # Usage Example
//!
//! ```rust
//! use iot_middleware_testbed::broker::*;
//! use iot_middleware_testbed::types::{EntityId, EntityKind};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = InMemoryBroker::new();
//! let client = broker.connect().unwrap();
//! let dev = EntityId::new("dev0").unwrap();
//! let apikey = client.register(&dev, EntityKind::Device).await.unwrap();
//! assert_eq!(broker.registered(), vec![dev.clone()]);
//! # let _ = apikey;
//! # });
//! ```

pub mod client;
pub mod memory;

pub use client::*;
pub use memory::*;
