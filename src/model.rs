//! Core data types for the flood forecast service.
//!
//! This module defines the shared domain model imported by all other modules:
//! series names, rating curves, offsets, release roles, correction policies
//! and the crate-wide error type. It contains no I/O.

use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Series names
// ---------------------------------------------------------------------------

/// Observed water level from the gage sensor.
pub const ACTUAL: &str = "Actual";

/// Simulated discharge converted to water level through the rating curve.
pub const PREDICTED: &str = "Simulated";
pub const PREDICTED_OFFSET: &str = "Simulated + offset";

/// Simulated water level after the robust linear regression against actual.
pub const REGRESSED: &str = "Simulated w/ LinearRegress(x-P,y-A)";
pub const REGRESSED_OFFSET: &str = "Simulated w/ LinearRegress(x-P,y-A) + offset";

/// Raw output of the tide utility.
pub const TIDE: &str = "Tidal Prediction";
pub const TIDE_OFFSET: &str = "Tidal Prediction + offset";

/// Simulated water level plus the de-meaned tide.
pub const PREDICTED_TIDE: &str = "Simulated + Tidal Prediction";
pub const PREDICTED_TIDE_OFFSET: &str = "Simulated + Tidal Prediction + offset";

/// Forecast published by earlier cycles, loaded from the forecast cache.
pub const OLD_PREDICTED: &str = "Old Predicted";

/// Every series name a gage's priority list may refer to.
pub const PREDICTED_SERIES_KEYS: &[&str] = &[
    PREDICTED,
    PREDICTED_OFFSET,
    REGRESSED,
    REGRESSED_OFFSET,
    TIDE,
    TIDE_OFFSET,
    PREDICTED_TIDE,
    PREDICTED_TIDE_OFFSET,
];

// ---------------------------------------------------------------------------
// Rating curve
// ---------------------------------------------------------------------------

/// Functional form of a stage-discharge relationship.
///
/// Configuration accepts both the long names and the short codes used in
/// older gage sheets (`LIN`, `EXP`, `POW`, `LOG`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EquationKind {
    /// q = a·h + b
    #[serde(alias = "LIN")]
    Linear,
    /// q = a·e^(b·h)
    #[serde(alias = "EXP")]
    Exponential,
    /// q = a·h^b
    #[serde(alias = "POW")]
    Power,
    /// q = a·ln(h) − b
    #[serde(alias = "LOG")]
    Logarithmic,
}

impl fmt::Display for EquationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquationKind::Linear => write!(f, "LINEAR"),
            EquationKind::Exponential => write!(f, "EXPONENTIAL"),
            EquationKind::Power => write!(f, "POWER"),
            EquationKind::Logarithmic => write!(f, "LOGARITHMIC"),
        }
    }
}

/// Stage-discharge curve parameters for a discharge gage.
///
/// The conversions live in `analysis::rating`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RatingCurve {
    pub a: f64,
    pub b: f64,
    #[serde(rename = "equation")]
    pub kind: EquationKind,
}

// ---------------------------------------------------------------------------
// Offsets and release roles
// ---------------------------------------------------------------------------

/// An additive correction turning `source` into `destination`.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesOffset {
    pub source: String,
    pub destination: String,
    pub value: f64,
    /// Timestamp the offset was measured at.
    pub anchor: NaiveDateTime,
}

/// Semantic role a series plays in the exported forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeriesRole {
    Actual,
    Predicted,
    OldPredicted,
}

impl fmt::Display for SeriesRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesRole::Actual => write!(f, "Actual"),
            SeriesRole::Predicted => write!(f, "Predicted"),
            SeriesRole::OldPredicted => write!(f, "Old Predicted"),
        }
    }
}

/// Maps internal series names onto the roles used for export and charting.
///
/// Produced once per gage per cycle by `analysis::priority::resolve_release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTranslation {
    pub actual: String,
    pub predicted: String,
    pub old_predicted: String,
}

impl ReleaseTranslation {
    /// Name of the series playing `role`.
    pub fn series_for(&self, role: SeriesRole) -> &str {
        match role {
            SeriesRole::Actual => &self.actual,
            SeriesRole::Predicted => &self.predicted,
            SeriesRole::OldPredicted => &self.old_predicted,
        }
    }

    /// Role of a series name, if it has one in this release.
    pub fn role_of(&self, name: &str) -> Option<SeriesRole> {
        self.iter().find(|(_, n)| *n == name).map(|(role, _)| role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SeriesRole, &str)> {
        [
            (SeriesRole::Actual, self.actual.as_str()),
            (SeriesRole::Predicted, self.predicted.as_str()),
            (SeriesRole::OldPredicted, self.old_predicted.as_str()),
        ]
        .into_iter()
    }
}

// ---------------------------------------------------------------------------
// Correction policies
// ---------------------------------------------------------------------------

/// Which points of a source series receive the reconciliation offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetScope {
    /// Shift the whole series, history included.
    #[default]
    FullSeries,
    /// Shift only points at or after the anchor timestamp.
    FromAnchor,
}

/// What the priority resolver does when no preferred series was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityFallback {
    /// Publish the uncorrected simulated series.
    #[default]
    BaseSeries,
    /// Fail the gage for this cycle.
    Fail,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised anywhere in the forecast pipeline.
///
/// `logging::classify_failure` decides how loudly each one is reported.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Sensor data, an anchor point, or a tide prediction was not available.
    #[error("No data available: {0}")]
    DataNotFound(String),
    /// Too few usable samples for a statistical correction.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    /// An external process exited unsuccessfully or could not be started.
    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: String, detail: String },
    /// A numeric conversion was outside its mathematical domain.
    #[error("Domain error: {0}")]
    Domain(String),
    /// None of the gage's preferred series were computed this cycle.
    #[error("No prioritized series available for gage {gage} (wanted {wanted:?})")]
    PriorityMismatch { gage: String, wanted: Vec<String> },
    /// A series constructor saw the same timestamp twice.
    #[error("Duplicate timestamp: {0}")]
    DuplicateTimestamp(NaiveDateTime),
    /// Non-2xx response from the sensor repository.
    #[error("HTTP error: {0}")]
    Http(String),
    /// A payload or file could not be interpreted.
    #[error("Parse error: {0}")]
    Parse(String),
    /// Missing or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<reqwest::Error> for ForecastError {
    fn from(err: reqwest::Error) -> Self {
        ForecastError::Http(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
