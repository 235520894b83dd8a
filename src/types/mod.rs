//! Core types and identifiers for the middleware testbed
//!
//! This module contains the identifiers, enumerations and configuration
//! structures shared by every other module.
//!
//! # Overview
//!
//! - **Identifiers**: validated entity names, broker API keys, follow request ids
//! - **Enums**: entity kinds, permission modes, streams, behavior states
//! - **Configuration**: CLI arguments, config files and validation
//!
//! # Usage Example
//!
//! ```rust
//! use iot_middleware_testbed::types::*;
//!
//! let device = EntityId::new("streetlight0").unwrap();
//! assert!(EntityId::new("Street-Light").is_err());
//!
//! let mode: PermissionMode = "read-write".parse().unwrap();
//! assert_eq!(mode.rights().len(), 2);
//!
//! let config = SimulationConfig { device_count: 3, ..Default::default() };
//! assert!(config.validate().is_ok());
//! # let _ = device;
//! ```

pub mod config;
pub mod enums;
pub mod identifiers;

// Re-export all public types for convenience
pub use config::*;
pub use enums::*;
pub use identifiers::*;
