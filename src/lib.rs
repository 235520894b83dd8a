//! IoT Middleware Testbed
//!
//! A discrete-event testbed that exercises an IoT message broker with simulated
//! devices and apps, injects faults into devices and checks that apps bring them
//! back to normal operation.
//!
//! # Overview
//!
//! A run has three phases:
//!
//! 1. **Setup**: every entity is registered and every declared permission is
//!    established with the follow, share and bind protocol. Any failure rolls
//!    back all registrations.
//! 2. **Run**: devices publish readings and apps consume them on a logical
//!    clock. Planned faults interrupt devices, which report the fault and wait
//!    for a `RESUME` command from a controlling app.
//! 3. **Teardown**: outbound interfaces drain, behaviors stop their ports,
//!    workers are joined and the entities are deregistered.
//!
//! ## Quick Start
//!
//! ```rust
//! use iot_middleware_testbed::*;
//!
//! let config = SimulationConfig {
//!     device_count: 1,
//!     app_count: 1,
//!     simulation_time: 2.0,
//!     realtime_factor: 0.0,
//!     ..Default::default()
//! };
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let broker = InMemoryBroker::new();
//! let stats = SimulationOrchestrator::new(config)?.execute(runtime.handle(), &broker)?;
//! assert_eq!(stats.apps.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`types`]: identifiers, enums and configuration
//! - [`broker`]: broker client abstraction and the in-memory broker
//! - [`permissions`]: system descriptions and the setup protocol
//! - [`messaging`]: queue-backed communication interfaces
//! - [`entity`]: device and app behaviors
//! - [`simulation`]: scheduler, fault injection, orchestration and statistics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Types     │    │ Permissions │    │   Entity    │
//! │             │    │             │    │             │
//! │ Identifiers │◄───┤ Description │    │ Device      │
//! │ Enums       │    │ Setup       │    │ App         │
//! │ Config      │    │             │    │             │
//! └─────────────┘    └─────────────┘    └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │ Simulation  │    │   Broker    │◄───┤  Messaging  │
//! │             │    │             │    │             │
//! │ Scheduler   │    │ Client      │    │ Interfaces  │
//! │ Orchestrator│    │ In-memory   │    │ Ports       │
//! └─────────────┘    └─────────────┘    └─────────────┘
//! ```
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub mod broker;
pub mod entity;
pub mod messaging;
pub mod permissions;
pub mod simulation;
pub mod types;

// Core types and configuration
pub use types::{
    ApiKey, ConfigError, ConfigValidationError, DeviceModel, EntityId, EntityKind, EntityState, PermissionMode,
    SimulationConfig, Stream,
};

// Broker
pub use broker::{BrokerClient, BrokerConnector, BrokerError, Credentials, Exchange, InMemoryBroker};

// Setup protocol
pub use permissions::{
    deregister_entities, setup_entities, setup_plan, RegisteredEntities, SetupError, SetupPlan, SystemDescription,
};

// Interfaces and behaviors
pub use entity::{AmbientLight, AppBehavior, DeviceBehavior, DeviceProfile, Streetlight};
pub use messaging::{Command, DeliveryStrategy, InterfaceKind, Message};

// Simulation
pub use simulation::{
    FaultInjector, FaultPlan, RunStatistics, Scheduler, SimTime, SimulationError, SimulationOrchestrator,
    SimulationResult, StateInjector,
};
