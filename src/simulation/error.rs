//! Error types and handling
//!
//! This module contains the top-level error type of a testbed run.

use crate::broker::BrokerError;
use crate::permissions::{DescriptionError, SetupError};
use crate::types::{ConfigError, ConfigValidationError, EntityState};
use thiserror::Error;

/// Errors that can occur during a testbed run
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigurationError(String),

    /// Configuration could not be loaded
    #[error(transparent)]
    ConfigLoadError(#[from] ConfigError),

    /// Entity registration or permission setup failed
    #[error(transparent)]
    SetupError(#[from] SetupError),

    /// A broker call outside setup failed
    #[error("Broker error: {0}")]
    BrokerError(#[from] BrokerError),

    /// A behavior received an interrupt it cannot handle in its state
    #[error("Entity {entity} cannot handle interrupt {cause:?} while {state}")]
    InvalidTransition {
        /// Interrupted entity
        entity: String,
        /// State at the time of the interrupt
        state: EntityState,
        /// Interrupt cause
        cause: String,
    },

    /// Interrupt aimed at a process that is not waiting
    #[error("Process {process} cannot be interrupted: {reason}")]
    InterruptNotDeliverable {
        /// Target process name
        process: String,
        /// Why delivery failed
        reason: String,
    },

    /// No process is registered under this name
    #[error("Unknown process: {0}")]
    UnknownProcess(String),

    /// Interface workers could not be started
    #[error("Interface error: {0}")]
    InterfaceError(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<ConfigValidationError> for SimulationError {
    fn from(error: ConfigValidationError) -> Self {
        SimulationError::ConfigurationError(error.to_string())
    }
}

impl From<DescriptionError> for SimulationError {
    fn from(error: DescriptionError) -> Self {
        SimulationError::SetupError(SetupError::InvalidDescription(error))
    }
}

impl SimulationError {
    /// Create a configuration error
    pub fn configuration_error(msg: impl Into<String>) -> Self {
        Self::ConfigurationError(msg.into())
    }

    /// Create an invalid transition error
    pub fn invalid_transition(entity: impl Into<String>, state: EntityState, cause: impl Into<String>) -> Self {
        Self::InvalidTransition { entity: entity.into(), state, cause: cause.into() }
    }

    /// Create an undeliverable interrupt error
    pub fn interrupt_not_deliverable(process: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InterruptNotDeliverable { process: process.into(), reason: reason.into() }
    }

    /// Create an interface error
    pub fn interface_error(msg: impl Into<String>) -> Self {
        Self::InterfaceError(msg.into())
    }

    /// Check if a run could continue after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            SimulationError::ConfigurationError(_) => false,
            SimulationError::ConfigLoadError(_) => false,
            SimulationError::SetupError(err) => !err.is_fatal(),
            SimulationError::BrokerError(_) => true,
            SimulationError::InvalidTransition { .. } => false,
            SimulationError::InterruptNotDeliverable { .. } => false,
            SimulationError::UnknownProcess(_) => false,
            SimulationError::InterfaceError(_) => true,
            SimulationError::IoError(_) => true,
            SimulationError::SerializationError(_) => true,
        }
    }

    /// Get the error category
    pub fn category(&self) -> &'static str {
        match self {
            SimulationError::ConfigurationError(_) | SimulationError::ConfigLoadError(_) => "Configuration",
            SimulationError::SetupError(_) => "Setup",
            SimulationError::BrokerError(_) => "Broker",
            SimulationError::InvalidTransition { .. } => "Behavior",
            SimulationError::InterruptNotDeliverable { .. } | SimulationError::UnknownProcess(_) => "Scheduler",
            SimulationError::InterfaceError(_) => "Interface",
            SimulationError::IoError(_) => "IO",
            SimulationError::SerializationError(_) => "Serialization",
        }
    }
}

/// Result type for simulation operations
pub type SimulationResult<T> = Result<T, SimulationError>;
