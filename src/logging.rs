/// Structured logging for the forecast service.
///
/// Every record carries the subsystem it came from and, when relevant, the
/// gage it concerns. Records go through `tracing`; `init_logger` installs a
/// console layer and, optionally, a plain-text file layer for daemon runs.
/// `RUST_LOG` overrides the configured level.

use serde::Deserialize;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt as tfmt, prelude::*};

use crate::model::ForecastError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// Telemetry repository
    Sensor,
    /// Hydrologic model run
    Simulation,
    /// Time-series store handler
    Storage,
    /// Tide utility
    Tide,
    /// Per-gage correction and export
    Pipeline,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Sensor => write!(f, "SENSOR"),
            DataSource::Simulation => write!(f, "SIM"),
            DataSource::Storage => write!(f, "STORE"),
            DataSource::Tide => write!(f, "TIDE"),
            DataSource::Pipeline => write!(f, "PIPE"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - sensor offline, too little data for a correction
    Expected,
    /// Unexpected failure - external tool or service broke
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger setup
// ---------------------------------------------------------------------------

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logger(min_level: LogLevel, log_file: Option<&Path>, console_timestamps: bool) -> Result<(), ForecastError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(min_level.as_filter()));

    let console = tfmt::layer().with_target(false);
    let console = if console_timestamps {
        console.boxed()
    } else {
        console.without_time().boxed()
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tfmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| ForecastError::Config(format!("logger already initialised: {}", e)))
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

pub fn info(source: DataSource, gage_id: Option<&str>, message: &str) {
    tracing::info!(source = %source, gage = gage_id.unwrap_or("-"), "{}", message);
}

pub fn warn(source: DataSource, gage_id: Option<&str>, message: &str) {
    tracing::warn!(source = %source, gage = gage_id.unwrap_or("-"), "{}", message);
}

pub fn error(source: DataSource, gage_id: Option<&str>, message: &str) {
    tracing::error!(source = %source, gage = gage_id.unwrap_or("-"), "{}", message);
}

pub fn debug(source: DataSource, gage_id: Option<&str>, message: &str) {
    tracing::debug!(source = %source, gage = gage_id.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Missing data and too-small samples happen every dry spell or sensor
/// outage; tool and transport failures need a human.
pub fn classify_failure(err: &ForecastError) -> FailureType {
    match err {
        ForecastError::DataNotFound(_) | ForecastError::InsufficientData(_) => FailureType::Expected,
        ForecastError::ExternalTool { .. } | ForecastError::Http(_) | ForecastError::Io(_) => {
            FailureType::Unexpected
        }
        _ => FailureType::Unknown,
    }
}

/// Logs a failed step for a gage at a level matching its classification.
pub fn log_gage_failure(source: DataSource, gage_id: &str, operation: &str, err: &ForecastError) {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(source, Some(gage_id), &message),
        FailureType::Unexpected => error(source, Some(gage_id), &message),
        FailureType::Unknown => warn(source, Some(gage_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Cycle Summary Logging
// ---------------------------------------------------------------------------

pub fn log_cycle_summary(cycle: &str, total: usize, successful: usize, failed: usize) {
    let message = format!(
        "Cycle {} complete: {}/{} gages published, {} failed",
        cycle, successful, total, failed
    );

    if failed == 0 {
        info(DataSource::System, None, &message);
    } else if successful == 0 {
        error(DataSource::System, None, &message);
    } else {
        warn(DataSource::System, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_failure_classification() {
        let missing = ForecastError::DataNotFound("no water level".to_string());
        assert_eq!(classify_failure(&missing), FailureType::Expected);

        let tool = ForecastError::ExternalTool {
            tool: "simulation".to_string(),
            detail: "exit status: 1".to_string(),
        };
        assert_eq!(classify_failure(&tool), FailureType::Unexpected);

        let domain = ForecastError::Domain("ln(-1)".to_string());
        assert_eq!(classify_failure(&domain), FailureType::Unknown);
    }

    #[test]
    fn test_level_accepts_warn_spelling() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }
        let w: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(w.level, LogLevel::Warning);
        assert_eq!(LogLevel::Warning.as_filter(), "warn");
    }

    #[test]
    fn test_logging_without_subscriber_is_silent() {
        // No subscriber installed in unit tests; these must not panic.
        info(DataSource::System, None, "hello");
        log_gage_failure(
            DataSource::Pipeline,
            "G1",
            "regression",
            &ForecastError::InsufficientData("1 sample".to_string()),
        );
        log_cycle_summary("2024-05-01 00:00", 2, 1, 1);
    }
}
