//! Configuration structures for the middleware testbed
//!
//! This module contains the command line interface, the partial configuration
//! file and the merged, validated simulation configuration.

use super::{DeviceModel, PermissionMode};
use crate::messaging::DeliveryStrategy;
use crate::simulation::SimTime;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Interrupt cause used when a fault flag does not name one
pub const DEFAULT_FAULT_CAUSE: &str = "FAULT";

/// Shortest accepted period or interval, in seconds
pub const MIN_PERIOD_SECS: f64 = 0.001;

/// A fault to inject into one entity at one logical time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultSpec {
    /// Target entity name
    pub entity: String,
    /// Logical time in seconds
    pub at: f64,
    /// Interrupt cause delivered to the entity
    #[serde(default = "default_fault_cause")]
    pub cause: String,
}

fn default_fault_cause() -> String {
    DEFAULT_FAULT_CAUSE.to_string()
}

impl fmt::Display for FaultSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.entity, self.at, self.cause)
    }
}

impl FromStr for FaultSpec {
    type Err = String;

    /// Parse `ENTITY@SECONDS` or `ENTITY@SECONDS:CAUSE`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (entity, rest) = s
            .split_once('@')
            .ok_or_else(|| format!("Invalid fault '{}': expected ENTITY@SECONDS[:CAUSE]", s))?;
        let (at, cause) = match rest.split_once(':') {
            Some((at, cause)) => (at, cause.to_string()),
            None => (rest, default_fault_cause()),
        };
        let at: f64 = at
            .parse()
            .map_err(|_| format!("Invalid fault time '{}' in '{}'", at, s))?;
        if entity.is_empty() {
            return Err(format!("Invalid fault '{}': entity is empty", s));
        }
        Ok(Self { entity: entity.to_string(), at, cause })
    }
}

/// Command line arguments structure
#[derive(Debug, Clone, Parser)]
#[command(
    name = "iot-testbed",
    version = "0.1.0",
    about = "IoT middleware testbed - simulates devices and apps over a capability-based pub/sub broker",
    long_about = "Registers a set of devices and apps with the broker, wires their follow/share/bind permissions, then runs their behavior loops in logical time while injected faults exercise the NORMAL/FAULT recovery path.

EXAMPLES:
    # Two devices, one app, every app follows every device read-write
    iot-testbed --devices 2 --apps 1

    # Use a system description file
    iot-testbed --system system.json

    # Inject a fault into dev0 at t=5 and run as fast as possible
    iot-testbed --fault dev0@5 --realtime-factor 0

    # Five streetlights, each waking the next two on activity
    iot-testbed --devices 5 --device-model streetlight --neighbours 2

    # Generate configuration template
    iot-testbed --print-config > my-config.json

    # Validate configuration without running
    iot-testbed --config my-config.json --dry-run

CONFIGURATION:
    Configuration can be provided via:
    1. Command line arguments (highest priority)
    2. Configuration file (--config flag)
    3. Default values (lowest priority)

    Supported configuration file formats: JSON (.json)"
)]
pub struct CliArgs {
    /// Configuration file path (JSON format)
    #[arg(
        short,
        long,
        help = "Configuration file path (JSON format)",
        long_help = "Path to a JSON configuration file. CLI arguments will override file settings."
    )]
    pub config: Option<String>,

    /// System description file
    #[arg(
        short,
        long,
        help = "System description file (JSON)",
        long_help = "Path to a JSON system description with `entities` and `permissions`. When omitted, a fully connected description is generated from --devices, --apps and --permission."
    )]
    pub system: Option<String>,

    /// Number of generated devices
    #[arg(long = "devices", help = "Number of generated devices")]
    pub device_count: Option<usize>,

    /// Number of generated apps
    #[arg(long = "apps", help = "Number of generated apps")]
    pub app_count: Option<usize>,

    /// Permission mode for generated descriptions
    #[arg(long = "permission", help = "Permission mode for generated descriptions (read, write, read-write)")]
    pub permission_mode: Option<String>,

    /// Logical run length in seconds
    #[arg(long, help = "Logical run length in seconds")]
    pub simulation_time: Option<f64>,

    /// Device tick period in seconds
    #[arg(long, help = "Device tick period in seconds")]
    pub device_period: Option<f64>,

    /// App tick period in seconds
    #[arg(long, help = "App tick period in seconds")]
    pub app_period: Option<f64>,

    /// Inbound delivery strategy
    #[arg(long, help = "Inbound delivery strategy (poll or push)")]
    pub delivery: Option<String>,

    /// Device model
    #[arg(
        long,
        help = "Device model (counter or streetlight)",
        long_help = "counter devices publish a running count. streetlight devices follow an injected ambient light level, brighten on activity and alert their neighbours."
    )]
    pub device_model: Option<String>,

    /// Streetlights alerted on activity
    #[arg(long, help = "Number of following streetlights alerted when one detects activity")]
    pub neighbours: Option<usize>,

    /// Chance of activity entering the street each period
    #[arg(long, help = "Chance (0-1) that activity enters the street each device period")]
    pub activity_probability: Option<f64>,

    /// Polling interval in seconds
    #[arg(long, help = "Broker polling interval in seconds")]
    pub polling_interval: Option<f64>,

    /// Wall seconds per logical second
    #[arg(
        long,
        help = "Wall seconds per logical second (0 = as fast as possible)",
        long_help = "Scales logical time to wall-clock time. 1.0 runs in real time, 0 runs as fast as possible. Interface workers always run in real time."
    )]
    pub realtime_factor: Option<f64>,

    /// Faults to inject
    #[arg(
        long = "fault",
        value_name = "ENTITY@SECONDS[:CAUSE]",
        help = "Inject a fault (repeatable)"
    )]
    pub faults: Vec<FaultSpec>,

    /// Number of random faults
    #[arg(long, help = "Number of randomly placed device faults")]
    pub random_faults: Option<usize>,

    /// Random seed for reproducible results
    #[arg(long, help = "Random seed for reproducible fault plans")]
    pub seed: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, help = "Enable debug logging")]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, help = "Also write logs to a daily rolling file in this directory")]
    pub log_dir: Option<String>,

    /// Dry run mode - validate configuration without running simulation
    #[arg(long, help = "Validate configuration without running simulation")]
    pub dry_run: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in JSON format and exit")]
    pub print_config: bool,
}

/// Configuration file structure (allows partial configuration)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    /// System description file
    pub system_description: Option<String>,
    /// Number of generated devices
    pub device_count: Option<usize>,
    /// Number of generated apps
    pub app_count: Option<usize>,
    /// Permission mode for generated descriptions
    pub permission_mode: Option<String>,
    /// Logical run length in seconds
    pub simulation_time: Option<f64>,
    /// Device tick period in seconds
    pub device_period: Option<f64>,
    /// App tick period in seconds
    pub app_period: Option<f64>,
    /// Inbound delivery strategy
    pub delivery: Option<String>,
    /// Device model
    pub device_model: Option<String>,
    /// Streetlights alerted on activity
    pub neighbours: Option<usize>,
    /// Chance of activity entering the street each period
    pub activity_probability: Option<f64>,
    /// Ambient light levels per half day
    pub ambient_steps: Option<usize>,
    /// Polling interval in seconds
    pub polling_interval: Option<f64>,
    /// Maximum messages fetched per poll
    pub max_entries: Option<usize>,
    /// Capacity of each interface queue
    pub queue_capacity: Option<usize>,
    /// Wall seconds per logical second
    pub realtime_factor: Option<f64>,
    /// Drain-and-join bound in seconds
    pub drain_timeout: Option<f64>,
    /// Silence after which an app suspects a device
    pub silence_threshold: Option<f64>,
    /// Random seed
    pub seed: Option<u64>,
    /// Planned faults
    pub faults: Option<Vec<FaultSpec>>,
    /// Number of random faults
    pub random_faults: Option<usize>,
}

/// Configuration for a testbed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// System description file; generated when absent
    pub system_description: Option<String>,

    /// Number of generated devices
    pub device_count: usize,

    /// Number of generated apps
    pub app_count: usize,

    /// Permission mode for generated descriptions
    pub permission_mode: String,

    /// Logical run length in seconds
    pub simulation_time: f64,

    /// Device tick period in seconds
    pub device_period: f64,

    /// App tick period in seconds
    pub app_period: f64,

    /// Inbound delivery strategy (`poll` or `push`)
    pub delivery: String,

    /// Device model (`counter` or `streetlight`)
    pub device_model: String,

    /// Following streetlights alerted when one detects activity
    pub neighbours: usize,

    /// Chance that activity enters the street each device period
    pub activity_probability: f64,

    /// Ambient light levels from night to day; the cycle runs up then down
    pub ambient_steps: usize,

    /// Polling interval in seconds
    pub polling_interval: f64,

    /// Maximum messages fetched per poll
    pub max_entries: usize,

    /// Capacity of each interface queue
    pub queue_capacity: usize,

    /// Wall seconds per logical second, 0 for as fast as possible
    pub realtime_factor: f64,

    /// Bound in seconds for waiting on idle publishers and joining workers
    pub drain_timeout: f64,

    /// Seconds without data after which an app suspects a device
    pub silence_threshold: f64,

    /// Random seed for reproducible fault plans
    pub seed: Option<u64>,

    /// Planned faults
    pub faults: Vec<FaultSpec>,

    /// Number of random device faults added to the plan
    pub random_faults: usize,
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// Configuration file read error
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    /// JSON parsing error
    #[error("Failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Unsupported configuration file format
    #[error("Unsupported configuration file format: {0} (supported: .json)")]
    UnsupportedFormat(String),
}

/// Validation errors for simulation configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    /// Run length is invalid
    #[error("Simulation time must be greater than 0, got {0}")]
    InvalidSimulationTime(f64),

    /// A period or interval is invalid
    #[error("Invalid {field}: {value} (must be at least 0.001 seconds)")]
    InvalidPeriod {
        /// Name of the field
        field: String,
        /// The invalid value
        value: f64,
    },

    /// Generated description would be empty
    #[error("Generated systems need at least one device and one app, got {devices} devices and {apps} apps")]
    InvalidEntityCount {
        /// Configured device count
        devices: usize,
        /// Configured app count
        apps: usize,
    },

    /// Permission mode is not a known wire string
    #[error("Invalid permission mode: {0}")]
    InvalidPermissionMode(String),

    /// Delivery strategy is not known
    #[error("Invalid delivery strategy: {0} (expected poll or push)")]
    InvalidDelivery(String),

    /// Device model is not known
    #[error("Invalid device model: {0} (expected counter or streetlight)")]
    InvalidDeviceModel(String),

    /// Activity probability is outside [0, 1]
    #[error("Activity probability must be within [0, 1], got {0}")]
    InvalidActivityProbability(f64),

    /// Ambient cycle is too short
    #[error("Ambient steps must be at least 2, got {0}")]
    InvalidAmbientSteps(usize),

    /// Queue capacity is invalid
    #[error("Queue capacity must be greater than 0")]
    InvalidQueueCapacity,

    /// Poll batch size is invalid
    #[error("Max entries per poll must be greater than 0")]
    InvalidMaxEntries,

    /// Realtime factor is negative or not finite
    #[error("Realtime factor must be a finite value >= 0, got {0}")]
    InvalidRealtimeFactor(f64),

    /// Planned fault is out of range
    #[error("Invalid fault {fault}: {reason}")]
    InvalidFault {
        /// The offending fault
        fault: String,
        /// Why it was rejected
        reason: String,
    },
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            system_description: None,
            device_count: 2,
            app_count: 1,
            permission_mode: "read-write".to_string(),
            simulation_time: 10.0,
            device_period: 1.0,
            app_period: 0.5,
            delivery: "poll".to_string(),
            device_model: DeviceModel::Counter.to_string(),
            neighbours: 2,
            activity_probability: 0.2,
            ambient_steps: 20,
            polling_interval: 1.0,
            max_entries: 100,
            queue_capacity: 1024,
            realtime_factor: 1.0,
            drain_timeout: 2.0,
            silence_threshold: 5.0,
            seed: None,
            faults: Vec::new(),
            random_faults: 0,
        }
    }
}

impl SimulationConfig {
    /// Create a new configuration from command line arguments and optional config file
    pub fn from_args() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        Self::from_cli_args(args)
    }

    /// Create configuration from parsed CLI arguments
    pub fn from_cli_args(args: CliArgs) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(config_path) = &args.config {
            config = Self::from_file(config_path)?;
        }

        Self::apply_cli_overrides(&mut config, args);

        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                let content = fs::read_to_string(path)?;
                let config_file: ConfigFile = serde_json::from_str(&content)?;
                Ok(Self::from_config_file(config_file))
            }
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => Err(ConfigError::UnsupportedFormat("no extension".to_string())),
        }
    }

    /// Create configuration from a config file, merging with defaults
    fn from_config_file(file: ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            system_description: file.system_description.or(defaults.system_description),
            device_count: file.device_count.unwrap_or(defaults.device_count),
            app_count: file.app_count.unwrap_or(defaults.app_count),
            permission_mode: file.permission_mode.unwrap_or(defaults.permission_mode),
            simulation_time: file.simulation_time.unwrap_or(defaults.simulation_time),
            device_period: file.device_period.unwrap_or(defaults.device_period),
            app_period: file.app_period.unwrap_or(defaults.app_period),
            delivery: file.delivery.unwrap_or(defaults.delivery),
            device_model: file.device_model.unwrap_or(defaults.device_model),
            neighbours: file.neighbours.unwrap_or(defaults.neighbours),
            activity_probability: file.activity_probability.unwrap_or(defaults.activity_probability),
            ambient_steps: file.ambient_steps.unwrap_or(defaults.ambient_steps),
            polling_interval: file.polling_interval.unwrap_or(defaults.polling_interval),
            max_entries: file.max_entries.unwrap_or(defaults.max_entries),
            queue_capacity: file.queue_capacity.unwrap_or(defaults.queue_capacity),
            realtime_factor: file.realtime_factor.unwrap_or(defaults.realtime_factor),
            drain_timeout: file.drain_timeout.unwrap_or(defaults.drain_timeout),
            silence_threshold: file.silence_threshold.unwrap_or(defaults.silence_threshold),
            seed: file.seed.or(defaults.seed),
            faults: file.faults.unwrap_or(defaults.faults),
            random_faults: file.random_faults.unwrap_or(defaults.random_faults),
        }
    }

    /// Apply CLI argument overrides to configuration
    fn apply_cli_overrides(config: &mut Self, args: CliArgs) {
        if let Some(value) = args.system {
            config.system_description = Some(value);
        }
        if let Some(value) = args.device_count {
            config.device_count = value;
        }
        if let Some(value) = args.app_count {
            config.app_count = value;
        }
        if let Some(value) = args.permission_mode {
            config.permission_mode = value;
        }
        if let Some(value) = args.simulation_time {
            config.simulation_time = value;
        }
        if let Some(value) = args.device_period {
            config.device_period = value;
        }
        if let Some(value) = args.app_period {
            config.app_period = value;
        }
        if let Some(value) = args.delivery {
            config.delivery = value;
        }
        if let Some(value) = args.device_model {
            config.device_model = value;
        }
        if let Some(value) = args.neighbours {
            config.neighbours = value;
        }
        if let Some(value) = args.activity_probability {
            config.activity_probability = value;
        }
        if let Some(value) = args.polling_interval {
            config.polling_interval = value;
        }
        if let Some(value) = args.realtime_factor {
            config.realtime_factor = value;
        }
        if let Some(value) = args.random_faults {
            config.random_faults = value;
        }
        if let Some(value) = args.seed {
            config.seed = Some(value);
        }

        // Faults from the command line extend the file's plan
        config.faults.extend(args.faults);
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Print configuration as JSON
    pub fn print_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(self.simulation_time.is_finite() && self.run_end() > SimTime::ZERO) {
            return Err(ConfigValidationError::InvalidSimulationTime(self.simulation_time));
        }

        self.validate_period("device_period", self.device_period)?;
        self.validate_period("app_period", self.app_period)?;
        self.validate_period("polling_interval", self.polling_interval)?;
        self.validate_period("drain_timeout", self.drain_timeout)?;
        self.validate_period("silence_threshold", self.silence_threshold)?;

        if self.system_description.is_none() && (self.device_count == 0 || self.app_count == 0) {
            return Err(ConfigValidationError::InvalidEntityCount {
                devices: self.device_count,
                apps: self.app_count,
            });
        }

        self.permission_mode()?;
        self.delivery_strategy()?;
        self.device_model()?;

        if !(0.0..=1.0).contains(&self.activity_probability) {
            return Err(ConfigValidationError::InvalidActivityProbability(self.activity_probability));
        }
        if self.ambient_steps < 2 {
            return Err(ConfigValidationError::InvalidAmbientSteps(self.ambient_steps));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigValidationError::InvalidQueueCapacity);
        }
        if self.max_entries == 0 {
            return Err(ConfigValidationError::InvalidMaxEntries);
        }

        if !(self.realtime_factor >= 0.0 && self.realtime_factor.is_finite()) {
            return Err(ConfigValidationError::InvalidRealtimeFactor(self.realtime_factor));
        }

        // Compared in logical milliseconds, the resolution the injector runs at
        let end = self.run_end();
        for fault in &self.faults {
            if !(fault.at >= 0.0 && fault.at.is_finite() && SimTime::from_secs_f64(fault.at) < end) {
                return Err(ConfigValidationError::InvalidFault {
                    fault: fault.to_string(),
                    reason: format!("time must be within [0, {})", end),
                });
            }
        }

        Ok(())
    }

    fn validate_period(&self, field: &str, value: f64) -> Result<(), ConfigValidationError> {
        if !(value >= MIN_PERIOD_SECS && value.is_finite()) {
            return Err(ConfigValidationError::InvalidPeriod { field: field.to_string(), value });
        }
        Ok(())
    }

    /// Permission mode used for generated descriptions
    pub fn permission_mode(&self) -> Result<PermissionMode, ConfigValidationError> {
        self.permission_mode
            .parse()
            .map_err(|_| ConfigValidationError::InvalidPermissionMode(self.permission_mode.clone()))
    }

    /// Inbound delivery strategy for subscribe-side interfaces
    pub fn delivery_strategy(&self) -> Result<DeliveryStrategy, ConfigValidationError> {
        match self.delivery.to_lowercase().as_str() {
            "poll" => Ok(DeliveryStrategy::Poll {
                interval: Duration::from_secs_f64(self.polling_interval),
                max_entries: self.max_entries,
            }),
            "push" => Ok(DeliveryStrategy::Push),
            _ => Err(ConfigValidationError::InvalidDelivery(self.delivery.clone())),
        }
    }

    /// Device model for every device of the run
    pub fn device_model(&self) -> Result<DeviceModel, ConfigValidationError> {
        self.device_model
            .parse()
            .map_err(|_| ConfigValidationError::InvalidDeviceModel(self.device_model.clone()))
    }

    /// Logical time at which the run stops
    pub fn run_end(&self) -> SimTime {
        SimTime::from_secs_f64(self.simulation_time)
    }

    /// Logical run length
    pub fn run_length(&self) -> Duration {
        self.run_end().as_duration()
    }

    /// Device tick period
    pub fn device_tick(&self) -> Duration {
        Duration::from_secs_f64(self.device_period)
    }

    /// App tick period
    pub fn app_tick(&self) -> Duration {
        Duration::from_secs_f64(self.app_period)
    }

    /// Drain-and-join bound
    pub fn drain_bound(&self) -> Duration {
        Duration::from_secs_f64(self.drain_timeout)
    }

    /// App silence threshold
    pub fn silence_bound(&self) -> Duration {
        Duration::from_secs_f64(self.silence_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_simulation_config_default() {
        let config = SimulationConfig::default();

        assert_eq!(config.device_count, 2);
        assert_eq!(config.app_count, 1);
        assert_eq!(config.permission_mode, "read-write");
        assert_eq!(config.device_period, 1.0);
        assert_eq!(config.app_period, 0.5);
        assert_eq!(config.polling_interval, 1.0);
        assert_eq!(config.max_entries, 100);
        assert!(config.faults.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fault_spec_parsing() {
        let fault: FaultSpec = "dev0@5".parse().unwrap();
        assert_eq!(fault, FaultSpec { entity: "dev0".into(), at: 5.0, cause: "FAULT".into() });

        let fault: FaultSpec = "dev1@2.5:POWER".parse().unwrap();
        assert_eq!(fault.at, 2.5);
        assert_eq!(fault.cause, "POWER");

        assert!("dev0".parse::<FaultSpec>().is_err());
        assert!("dev0@soon".parse::<FaultSpec>().is_err());
        assert!("@3".parse::<FaultSpec>().is_err());
    }

    #[test]
    fn test_config_file_loading() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"device_count": 4, "delivery": "push", "faults": [{{"entity": "dev1", "at": 3.0}}]}}"#
        )
        .unwrap();

        let config = SimulationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.device_count, 4);
        assert_eq!(config.delivery, "push");
        assert_eq!(config.faults[0].cause, "FAULT");
        assert_eq!(config.app_count, 1);
    }

    #[test]
    fn test_config_file_unsupported_extension() {
        let file = Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            SimulationConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_cli_overrides_extend_faults() {
        let args = CliArgs::try_parse_from([
            "iot-testbed",
            "--devices",
            "3",
            "--fault",
            "dev0@4",
            "--fault",
            "dev2@6:FAULT",
            "--realtime-factor",
            "0",
        ])
        .unwrap();

        let config = SimulationConfig::from_cli_args(args).unwrap();
        assert_eq!(config.device_count, 3);
        assert_eq!(config.faults.len(), 2);
        assert_eq!(config.realtime_factor, 0.0);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = SimulationConfig { simulation_time: 0.0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidSimulationTime(_))));

        let config = SimulationConfig { app_period: -1.0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidPeriod { .. })));

        let config = SimulationConfig { permission_mode: "admin".into(), ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidPermissionMode(_))
        ));

        let config = SimulationConfig { delivery: "carrier-pigeon".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidDelivery(_))));

        let config = SimulationConfig { device_count: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidEntityCount { .. })));

        let config = SimulationConfig {
            faults: vec![FaultSpec { entity: "dev0".into(), at: 30.0, cause: "FAULT".into() }],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidFault { .. })));
    }

    #[test]
    fn test_sub_millisecond_periods_are_rejected() {
        let config = SimulationConfig { device_period: 0.0005, ..Default::default() };
        match config.validate() {
            Err(ConfigValidationError::InvalidPeriod { field, value }) => {
                assert_eq!(field, "device_period");
                assert_eq!(value, 0.0005);
            }
            other => panic!("unexpected result {:?}", other),
        }

        let config = SimulationConfig { app_period: 0.0009, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidPeriod { .. })));

        let config = SimulationConfig { device_period: 0.001, app_period: 0.001, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fault_rounding_onto_run_end_is_rejected() {
        let config = SimulationConfig {
            simulation_time: 10.0,
            faults: vec![FaultSpec { entity: "dev0".into(), at: 9.9996, cause: "FAULT".into() }],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidFault { .. })));

        let config = SimulationConfig {
            simulation_time: 10.0,
            faults: vec![FaultSpec { entity: "dev0".into(), at: 9.999, cause: "FAULT".into() }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.run_end(), SimTime::from_millis(10_000));
    }

    #[test]
    fn test_streetlight_settings_are_validated() {
        let config = SimulationConfig { device_model: "streetlight".into(), ..Default::default() };
        assert_eq!(config.device_model().unwrap(), DeviceModel::Streetlight);
        assert!(config.validate().is_ok());

        let config = SimulationConfig { device_model: "lamp".into(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidDeviceModel(_))));

        let config = SimulationConfig { activity_probability: 1.5, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidActivityProbability(_))
        ));

        let config = SimulationConfig { ambient_steps: 1, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigValidationError::InvalidAmbientSteps(1))));
    }

    #[test]
    fn test_delivery_strategy_from_config() {
        let config = SimulationConfig { polling_interval: 0.25, max_entries: 10, ..Default::default() };
        assert_eq!(
            config.delivery_strategy().unwrap(),
            DeliveryStrategy::Poll { interval: Duration::from_millis(250), max_entries: 10 }
        );

        let config = SimulationConfig { delivery: "PUSH".into(), ..Default::default() };
        assert_eq!(config.delivery_strategy().unwrap(), DeliveryStrategy::Push);
    }

    #[test]
    fn test_simulation_config_serialization() {
        let config = SimulationConfig::default();
        let json = config.print_json().unwrap();
        let parsed: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.simulation_time, config.simulation_time);
        assert_eq!(parsed.delivery, config.delivery);
    }
}
