//! Entity registration and permission setup
//!
//! This module turns a declarative system description into registered
//! entities with working bindings on the broker.
//!
//! # Overview
//!
//! - **SystemDescription**: entity names, permission triples and optional kinds
//! - **SetupPlan**: the validated, typed form of a description
//! - **setup_entities**: register, follow, share, check and bind, with rollback
//! - **deregister_entities**: best-effort removal used on teardown and rollback
//!
//! # Usage Example
//!
//! ```rust
//! use iot_middleware_testbed::broker::{BrokerConnector, InMemoryBroker};
//! use iot_middleware_testbed::permissions::*;
//! use iot_middleware_testbed::types::PermissionMode;
//!
//! # tokio_test_block(async {
//! let broker = InMemoryBroker::new();
//! let client = broker.connect()?;
//! let description = SystemDescription::fully_connected(2, 1, PermissionMode::ReadWrite);
//!
//! let registered = setup_entities(client.as_ref(), &description).await?;
//! assert_eq!(registered.len(), 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod description;
pub mod setup;

pub use description::*;
pub use setup::*;
