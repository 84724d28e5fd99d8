//! Structured logging for Celeriac
//!
//! Provides structured logging with:
//! - Configurable log levels
//! - Environment-based filtering
//! - JSON, pretty or compact output
//! - Task context spans

use celeriac_core::LoggingSettings;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{TelemetryError, TelemetryResult};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (json, pretty, compact)
    pub format: LogFormat,

    /// Include file/line information
    pub include_location: bool,

    /// Include target (module path)
    pub include_target: bool,

    /// Environment filter string (e.g., "celeriac_client=debug,lapin=warn")
    pub env_filter: Option<String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (machine-readable)
    Json,
    /// Pretty format (human-readable, colored)
    Pretty,
    /// Compact format (single line)
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> TelemetryResult<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(TelemetryError::Config(format!("unknown log format: {}", other))),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            include_target: true,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Build from the logging section of the client configuration
    pub fn from_settings(settings: &LoggingSettings) -> TelemetryResult<Self> {
        Ok(Self {
            level: settings.level.clone(),
            format: settings.format.parse()?,
            ..Default::default()
        })
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let directives = self.env_filter.as_deref().unwrap_or(&self.level);
        EnvFilter::try_new(directives).map_err(|e| TelemetryError::Logging(e.to_string()))
    }
}

/// Initialize logging with configuration
pub fn init_logging(config: LoggingConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = config.filter()?;

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .map_err(|e| TelemetryError::Logging(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_timer(UtcTime::rfc_3339())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .map_err(|e| TelemetryError::Logging(e.to_string()))?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_timer(UtcTime::rfc_3339())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
                .map_err(|e| TelemetryError::Logging(e.to_string()))?;
        }
    }

    tracing::info!(
        "Logging initialized with level: {}, format: {:?}",
        config.level,
        config.format
    );

    Ok(())
}

/// Log context for one submitted task
#[derive(Debug, Clone)]
pub struct TaskLogContext {
    pub task_id: String,
    pub task_name: String,
    pub exchange: String,
}

impl TaskLogContext {
    /// Create a new task log context
    pub fn new(task_id: &str, task_name: &str, exchange: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            exchange: exchange.to_string(),
        }
    }

    /// Create a tracing span with this context
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            task_name = %self.task_name,
            exchange = %self.exchange
        )
    }
}

/// Log task submission
#[macro_export]
macro_rules! log_task_submitted {
    ($task_id:expr, $task_name:expr, $exchange:expr) => {
        $crate::tracing::info!(
            task_id = %$task_id,
            task_name = %$task_name,
            exchange = %$exchange,
            event = "task.submitted",
            "Task submitted"
        )
    };
}

/// Log a result becoming available
#[macro_export]
macro_rules! log_result_ready {
    ($task_id:expr, $status:expr) => {
        $crate::tracing::debug!(
            task_id = %$task_id,
            status = %$status,
            event = "result.ready",
            "Task result received"
        )
    };
}

/// Log a poll loop giving up
#[macro_export]
macro_rules! log_poll_timeout {
    ($task_id:expr, $task_name:expr, $timeout:expr) => {
        $crate::tracing::warn!(
            task_id = %$task_id,
            task_name = %$task_name,
            timeout = ?$timeout,
            event = "result.timeout",
            "Task result did not arrive in time"
        )
    };
}
