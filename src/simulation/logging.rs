//! Logging and tracing configuration
//!
//! This module provides centralized logging configuration for the testbed and
//! the [`RunContext`] that scopes every entity and interface to a span.

use crate::messaging::InterfaceKind;
use crate::types::{EntityId, EntityKind};
use chrono::{DateTime, Utc};
use std::io;
use tracing::{debug_span, info, info_span, Level, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};
use uuid::Uuid;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for the application
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json_format: bool,
    /// Whether to log to file
    pub log_to_file: bool,
    /// Log file directory (if logging to file)
    pub log_directory: Option<String>,
    /// Log file prefix (if logging to file)
    pub log_file_prefix: String,
    /// Whether to enable span events
    pub enable_span_events: bool,
    /// Whether to enable ansi colors in console output
    pub enable_ansi: bool,
    /// Custom environment filter
    pub env_filter: Option<String>,
    /// Extra filter directives appended to the level filter
    pub directives: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            log_to_file: false,
            log_directory: None,
            log_file_prefix: "iot-testbed".to_string(),
            enable_span_events: false,
            enable_ansi: true,
            env_filter: None,
            directives: Vec::new(),
        }
    }
}

/// Keeps the non-blocking writers flushing; logs written after drop may be lost
#[derive(Debug)]
#[must_use = "dropping the guard stops the log writers"]
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Enable JSON formatting
    pub fn with_json_format(mut self) -> Self {
        self.json_format = true;
        self
    }

    /// Enable file logging
    pub fn with_file_logging(mut self, directory: impl Into<String>) -> Self {
        self.log_to_file = true;
        self.log_directory = Some(directory.into());
        self
    }

    /// Set log file prefix
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_file_prefix = prefix.into();
        self
    }

    /// Enable span events
    pub fn with_span_events(mut self) -> Self {
        self.enable_span_events = true;
        self
    }

    /// Disable ANSI colors
    pub fn without_ansi(mut self) -> Self {
        self.enable_ansi = false;
        self
    }

    /// Set custom environment filter
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Add a filter directive such as `iot_middleware_testbed::broker=warn`
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.enable_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Filter used when `RUST_LOG` and a custom filter are both absent
    pub fn default_filter(&self) -> String {
        let mut filter = format!("{}={}", env!("CARGO_PKG_NAME").replace('-', "_"), self.level);
        for directive in &self.directives {
            filter.push(',');
            filter.push_str(directive);
        }
        filter
    }

    /// Initialize the global tracing subscriber
    pub fn init(self) -> Result<LoggingGuard, Box<dyn std::error::Error + Send + Sync>> {
        let env_filter = match &self.env_filter {
            Some(filter) => EnvFilter::try_new(filter)?,
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_filter())),
        };

        let mut guards = Vec::new();
        let (console_writer, console_guard) = non_blocking(io::stderr());
        guards.push(console_guard);

        let file_layer = if self.log_to_file {
            let log_dir = self.log_directory.as_deref().unwrap_or("logs");
            let (file_writer, file_guard) = non_blocking(rolling::daily(log_dir, &self.log_file_prefix));
            guards.push(file_guard);
            // Files are always JSON
            Some(fmt::layer().json().with_writer(file_writer).with_span_events(self.span_events()))
        } else {
            None
        };

        let (json_console, pretty_console) = if self.json_format {
            let layer = fmt::layer().json().with_writer(console_writer).with_span_events(self.span_events());
            (Some(layer), None)
        } else {
            let layer = fmt::layer()
                .with_writer(console_writer)
                .with_ansi(self.enable_ansi)
                .with_target(false)
                .with_span_events(self.span_events());
            (None, Some(layer))
        };

        Registry::default()
            .with(env_filter)
            .with(file_layer)
            .with(json_console)
            .with(pretty_console)
            .try_init()?;

        info!(level = %self.level, json = self.json_format, file = self.log_to_file, "Logging initialized");
        Ok(LoggingGuard { _guards: guards })
    }

    /// Initialize logging for development (debug console output)
    pub fn init_dev() -> Result<LoggingGuard, Box<dyn std::error::Error + Send + Sync>> {
        Self::new().with_level(Level::DEBUG).with_span_events().init()
    }

    /// Initialize logging for testing (minimal output)
    pub fn init_test() -> Result<LoggingGuard, Box<dyn std::error::Error + Send + Sync>> {
        Self::new().with_level(Level::WARN).without_ansi().init()
    }
}

/// Identity and root span of one testbed run
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    span: Span,
}

impl RunContext {
    /// Start a new run with a fresh id
    pub fn new() -> Self {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id);
        Self { run_id, started_at: Utc::now(), span }
    }

    /// Run id
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wall-clock start of the run
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Root span
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Span for one entity's behavior
    pub fn entity_span(&self, id: &EntityId, kind: EntityKind) -> Span {
        info_span!(parent: &self.span, "entity", id = %id, kind = %kind)
    }

    /// Span for one interface worker, nested under its entity's span
    pub fn interface_span(entity_span: &Span, kind: InterfaceKind) -> Span {
        debug_span!(parent: entity_span, "interface", kind = ?kind)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_logging_config_creation() {
        let config = LoggingConfig::new();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.json_format);
        assert!(!config.log_to_file);
        assert_eq!(config.log_file_prefix, "iot-testbed");
        assert!(config.directives.is_empty());
    }

    #[test]
    fn test_logging_config_builder_pattern() {
        let config = LoggingConfig::new()
            .with_level(Level::DEBUG)
            .with_json_format()
            .with_file_logging("test_logs")
            .with_file_prefix("run")
            .with_span_events()
            .without_ansi()
            .with_env_filter("debug");

        assert_eq!(config.level, Level::DEBUG);
        assert!(config.json_format);
        assert_eq!(config.log_directory, Some("test_logs".to_string()));
        assert_eq!(config.log_file_prefix, "run");
        assert!(config.enable_span_events);
        assert!(!config.enable_ansi);
        assert_eq!(config.env_filter, Some("debug".to_string()));
    }

    #[test]
    fn test_default_filter_appends_directives() {
        let config = LoggingConfig::new()
            .with_level(Level::DEBUG)
            .with_directive("iot_middleware_testbed::broker=warn");
        assert_eq!(
            config.default_filter(),
            "iot_middleware_testbed=DEBUG,iot_middleware_testbed::broker=warn"
        );
    }

    #[test]
    fn test_run_contexts_have_distinct_ids() {
        assert_ne!(RunContext::new().run_id(), RunContext::new().run_id());
    }
}
