//! Time-series store contract.
//!
//! The binary store is owned by an external handler. This crate talks to it
//! through a JSON request file and a JSON result file; the handler itself is
//! opaque. Pathnames follow the six-part `/A/B/C/D/E/F/` convention.

use chrono::{Datelike, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::engine::run_checked;
use crate::logging::{self, DataSource};
use crate::model::ForecastError;
use crate::series::TimeSeries;

const REQUEST_FILE: &str = "storage_request.json";
const RESULT_FILE: &str = "storage_result.json";

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageAction {
    Read,
    Write,
    Update,
}

impl StorageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageAction::Read => "read",
            StorageAction::Write => "write",
            StorageAction::Update => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoragePayload {
    pub data: TimeSeries,
    /// Store data type, e.g. `PER-CUM` for incremental rainfall.
    pub data_type: String,
    pub units: String,
    pub interval_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRequest {
    pub action: StorageAction,
    pub file: PathBuf,
    pub paths: Vec<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
    pub payload: Option<StoragePayload>,
}

impl StorageRequest {
    pub fn read(file: PathBuf, paths: Vec<String>, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            action: StorageAction::Read,
            file,
            paths,
            start: Some(start),
            end: Some(end),
            payload: None,
        }
    }

    pub fn write(file: PathBuf, path: String, payload: StoragePayload) -> Self {
        Self {
            action: StorageAction::Write,
            file,
            paths: vec![path],
            start: payload.data.first().map(|(t, _)| t),
            end: payload.data.last().map(|(t, _)| t),
            payload: Some(payload),
        }
    }

    /// Like `write`, merging into an existing record instead of replacing it.
    pub fn update(file: PathBuf, path: String, payload: StoragePayload) -> Self {
        Self {
            action: StorageAction::Update,
            ..Self::write(file, path, payload)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageResponse {
    #[serde(default)]
    pub series: Option<TimeSeries>,
}

impl StorageResponse {
    /// Series returned by a read; a missing series means the paths held no data.
    pub fn into_series(self) -> Result<TimeSeries, ForecastError> {
        self.series
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ForecastError::DataNotFound("store returned no data".to_string()))
    }
}

pub trait TimeSeriesStore {
    fn execute(&self, request: &StorageRequest) -> Result<StorageResponse, ForecastError>;
}

// ---------------------------------------------------------------------------
// Batch handler implementation
// ---------------------------------------------------------------------------

/// Runs the external handler as `<handler> <action> -if <request> -of <result>`.
pub struct BatchStorage {
    handler: PathBuf,
    work_dir: PathBuf,
}

impl BatchStorage {
    pub fn new(handler: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            handler: handler.into(),
            work_dir: work_dir.into(),
        }
    }

    fn remove_quietly(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                logging::warn(
                    DataSource::Storage,
                    None,
                    &format!("could not remove {}: {}", path.display(), e),
                );
            }
        }
    }
}

impl TimeSeriesStore for BatchStorage {
    fn execute(&self, request: &StorageRequest) -> Result<StorageResponse, ForecastError> {
        let request_file = self.work_dir.join(REQUEST_FILE);
        let result_file = self.work_dir.join(RESULT_FILE);
        fs::write(&request_file, serde_json::to_vec_pretty(request)?)?;

        logging::debug(
            DataSource::Storage,
            None,
            &format!("{} {:?} in {}", request.action.as_str(), request.paths, request.file.display()),
        );
        let outcome = run_checked(
            "storage handler",
            Command::new(&self.handler)
                .arg(request.action.as_str())
                .arg("-if")
                .arg(&request_file)
                .arg("-of")
                .arg(&result_file)
                .current_dir(&self.work_dir),
        );
        Self::remove_quietly(&request_file);
        outcome?;

        if !result_file.exists() {
            return Ok(StorageResponse::default());
        }
        let parsed = fs::read_to_string(&result_file)
            .map_err(ForecastError::from)
            .and_then(|text| serde_json::from_str(&text).map_err(ForecastError::from));
        Self::remove_quietly(&result_file);
        parsed
    }
}

// ---------------------------------------------------------------------------
// Pathnames
// ---------------------------------------------------------------------------

/// Six-part store pathname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    pub parts: [String; 6],
}

impl StoragePath {
    pub fn new(a: &str, b: &str, c: &str, d: &str, e: &str, f: &str) -> Self {
        Self {
            parts: [a, b, c, d, e, f].map(str::to_string),
        }
    }

    /// `/A/B/C/D/E/F/`
    pub fn pathname(&self) -> String {
        format!("/{}/", self.parts.join("/"))
    }

    /// `A-B-C.dss`
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}.dss", self.parts[0], self.parts[1], self.parts[2])
    }
}

/// Upper-cases a location for use in a pathname part.
pub fn sanitize_part(s: &str) -> String {
    s.replace(' ', "_").replace(',', "").to_uppercase()
}

/// Smallest irregular-data block that holds the whole range.
pub fn block_length(start: NaiveDateTime, end: NaiveDateTime) -> &'static str {
    let span = end - start;
    if span <= Duration::days(1) && start.date() == end.date() {
        "IR-DAY"
    } else if start.year() == end.year() && start.month() == end.month() {
        "IR-MONTH"
    } else if start.year() == end.year() {
        "IR-YEAR"
    } else if start.year() / 10 == end.year() / 10 {
        "IR-DECADE"
    } else {
        "IR-CENTURY"
    }
}

/// Where observed incremental rainfall for a gage is stored.
pub fn observed_rainfall_path(
    province: &str,
    location: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> StoragePath {
    StoragePath::new(
        &sanitize_part(province),
        &sanitize_part(location),
        "PRECIP-INC",
        "",
        block_length(start, end),
        "OBS",
    )
}

/// Where observed water level for a gage is stored.
pub fn observed_water_level_path(
    province: &str,
    location: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> StoragePath {
    StoragePath::new(
        &sanitize_part(province),
        &sanitize_part(location),
        "WATER-LEVEL",
        "",
        block_length(start, end),
        "OBS",
    )
}

/// Where the forecast discharge for the hydraulic model goes.
pub fn forecast_flow_path(province: &str, location: &str, start: NaiveDateTime, interval_minutes: u32) -> StoragePath {
    StoragePath::new(
        &sanitize_part(province),
        &sanitize_part(location),
        "FLOW",
        &start.format("%d%b%Y").to_string().to_uppercase(),
        &format!("{}MIN", interval_minutes),
        "FORECAST",
    )
}

/// Daily pathnames of the simulated flow at `gage_id`, one per day from
/// `start` through the day after `end`.
pub fn simulated_flow_paths(
    gage_id: &str,
    project: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    interval_minutes: u32,
) -> Vec<String> {
    let mut paths = Vec::new();
    let mut t = start;
    let stop = end + Duration::days(1);
    while t < stop {
        paths.push(
            StoragePath::new(
                "",
                &gage_id.to_uppercase(),
                "FLOW",
                &t.format("%d%b%Y").to_string().to_uppercase(),
                &format!("{}MIN", interval_minutes),
                &format!("RUN:{}", project.to_uppercase()),
            )
            .pathname(),
        );
        t += Duration::days(1);
    }
    paths
}
