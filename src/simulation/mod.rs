//! Simulation orchestration and control
//!
//! This module contains the logical-time scheduler, fault injection, the
//! orchestrator that wires entities to the broker, statistics collection,
//! logging setup and error handling.
//!
//! # Overview
//!
//! - **SimulationOrchestrator**: setup, run and drain-and-join teardown
//! - **Scheduler**: cooperative processes ordered by `(time, priority, sequence)`
//! - **Clock**: logical time, optionally paced against the wall clock
//! - **FaultInjector**: delivers planned `FAULT` interrupts
//! - **StateInjector**: drives ambient light and activity for streetlights
//! - **RunStatistics**: per-entity and per-interface totals
//! - **SimulationError**: top-level error type
//!
//! # Usage Example
//!
//! ```rust
//! use iot_middleware_testbed::broker::InMemoryBroker;
//! use iot_middleware_testbed::simulation::*;
//! use iot_middleware_testbed::types::*;
//!
//! let config = SimulationConfig {
//!     simulation_time: 3.0,
//!     realtime_factor: 0.0,
//!     ..Default::default()
//! };
//! let runtime = tokio::runtime::Runtime::new()?;
//! let orchestrator = SimulationOrchestrator::new(config)?;
//! let stats = orchestrator.execute(runtime.handle(), &InMemoryBroker::new())?;
//! assert_eq!(stats.devices.len(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod clock;
pub mod error;
pub mod fault_injector;
pub mod logging;
pub mod orchestrator;
pub mod scheduler;
pub mod state_injector;
pub mod statistics;

// Re-export all public types for convenience
pub use clock::*;
pub use error::*;
pub use fault_injector::*;
pub use logging::*;
pub use orchestrator::*;
pub use scheduler::*;
pub use state_injector::*;
pub use statistics::*;
