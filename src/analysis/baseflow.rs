//! Baseflow detection and synthetic rainfall scenarios.
//!
//! When rain has stopped but the catchment is still wet, the simulation is fed
//! a recorded storm (a scenario template) aligned on the current baseflow so
//! the forecast reflects the recession that is likely to follow.

use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::analysis::rating::discharge_to_water_level;
use crate::model::{ForecastError, RatingCurve};
use crate::series::TimeSeries;

pub const DEFAULT_KERNEL_SIZE: usize = 7;
/// Metres.
pub const DEFAULT_MAX_HEIGHT_DIFF: f64 = 0.020;

const SCENARIO_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseflowCriteria {
    /// Samples per kernel. Even sizes are widened by one to stay symmetric.
    pub kernel_size: usize,
    pub max_height_diff: f64,
}

impl Default for BaseflowCriteria {
    fn default() -> Self {
        Self {
            kernel_size: DEFAULT_KERNEL_SIZE,
            max_height_diff: DEFAULT_MAX_HEIGHT_DIFF,
        }
    }
}

impl BaseflowCriteria {
    fn half_width(&self) -> usize {
        self.kernel_size / 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseflow {
    pub time: NaiveDateTime,
    pub level: f64,
    pub height_diff: f64,
}

fn height_diff(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    max - min
}

/// Most recent point of `actual` sitting in a flat or receding stretch.
///
/// A candidate qualifies when the kernel centred on it spans no more than
/// `max_height_diff` and its first value is not below its last.
pub fn find_baseflow(actual: &TimeSeries, criteria: &BaseflowCriteria) -> Option<Baseflow> {
    let points: Vec<(NaiveDateTime, f64)> = actual.iter().collect();
    let half = criteria.half_width();
    if points.len() < 2 * half + 1 {
        return None;
    }
    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

    for i in (half..points.len() - half).rev() {
        let kernel = &values[i - half..=i + half];
        let diff = height_diff(kernel);
        if diff <= criteria.max_height_diff && kernel[0] >= kernel[kernel.len() - 1] {
            let (time, level) = points[i];
            return Some(Baseflow {
                time,
                level,
                height_diff: diff,
            });
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Scenario templates
// ---------------------------------------------------------------------------

/// A recorded storm: water-level response and rainfall, keyed by offset from
/// the template's first row.
#[derive(Debug, Clone, PartialEq)]
pub struct RainfallScenario {
    pub name: String,
    pub water_level: BTreeMap<Duration, f64>,
    pub rainfall: BTreeMap<Duration, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioMatch {
    pub scenario: String,
    /// Template offset whose water level best matches the baseflow.
    pub reference: Duration,
    pub height_diff: f64,
}

/// Picks the template point that best continues from `baseflow_level`.
///
/// Each template trace is scanned with the same kernel as `find_baseflow`,
/// extended with the baseflow level. Kernels must be rising or flat. The
/// smallest height difference across all templates wins; the earliest
/// candidate wins ties.
pub fn match_scenario(
    scenarios: &[RainfallScenario],
    baseflow_level: f64,
    criteria: &BaseflowCriteria,
) -> Option<ScenarioMatch> {
    let half = criteria.half_width();
    let mut best: Option<ScenarioMatch> = None;

    for scenario in scenarios {
        let trace: Vec<(Duration, f64)> = scenario.water_level.iter().map(|(k, v)| (*k, *v)).collect();
        if trace.len() < 2 * half + 1 {
            continue;
        }
        for i in half..trace.len() - half {
            let window = &trace[i - half..=i + half];
            if window[0].1 > window[window.len() - 1].1 {
                continue;
            }
            let mut kernel: Vec<f64> = window.iter().map(|(_, v)| *v).collect();
            kernel.push(baseflow_level);
            let diff = height_diff(&kernel);
            if best.as_ref().is_none_or(|b| diff < b.height_diff) {
                best = Some(ScenarioMatch {
                    scenario: scenario.name.clone(),
                    reference: trace[i].0,
                    height_diff: diff,
                });
            }
        }
    }
    best
}

/// The template's rainfall moved so `reference` lands on `baseflow_time`.
pub fn shift_scenario_rainfall(
    scenario: &RainfallScenario,
    reference: Duration,
    baseflow_time: NaiveDateTime,
) -> TimeSeries {
    scenario
        .rainfall
        .iter()
        .map(|(offset, v)| (baseflow_time + (*offset - reference), *v))
        .collect()
}

/// Real rainfall with the shifted template merged in, template winning overlaps.
pub fn inject_scenario_rainfall(
    rainfall: &TimeSeries,
    scenario: &RainfallScenario,
    reference: Duration,
    baseflow_time: NaiveDateTime,
) -> TimeSeries {
    let mut merged = rainfall.clone();
    merged.merge_overwrite(&shift_scenario_rainfall(scenario, reference, baseflow_time));
    merged
}

/// True when the last hour was dry but it rained within `recent` of `now`.
pub fn needs_synthetic_rainfall(rainfall: &TimeSeries, now: NaiveDateTime, recent: Duration) -> bool {
    let last_hour = rainfall.sum_between(now - Duration::hours(1), now);
    let recent_total = rainfall.sum_between(now - recent, now);
    last_hour <= 0.0 && recent_total > 0.0
}

/// Reads a template from CSV: a header row, then `time,discharge,rainfall`
/// with an optional rainfall column. Discharge goes through `curve`.
pub fn read_scenario<R: Read>(
    name: &str,
    reader: R,
    curve: &RatingCurve,
) -> Result<RainfallScenario, ForecastError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut begin: Option<NaiveDateTime> = None;
    let mut water_level = BTreeMap::new();
    let mut rainfall = BTreeMap::new();

    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let line = row + 2;
        let field = |i: usize| record.get(i).unwrap_or("");

        let time = NaiveDateTime::parse_from_str(field(0), SCENARIO_TIME_FORMAT).map_err(|e| {
            ForecastError::Parse(format!("{} line {}: bad time '{}': {}", name, line, field(0), e))
        })?;
        let offset = time - *begin.get_or_insert(time);

        let discharge: f64 = field(1).parse().map_err(|_| {
            ForecastError::Parse(format!("{} line {}: bad discharge '{}'", name, line, field(1)))
        })?;
        water_level.insert(offset, discharge_to_water_level(curve, discharge)?);

        if !field(2).is_empty() {
            let rain: f64 = field(2).parse().map_err(|_| {
                ForecastError::Parse(format!("{} line {}: bad rainfall '{}'", name, line, field(2)))
            })?;
            rainfall.insert(offset, rain);
        }
    }

    Ok(RainfallScenario {
        name: name.to_string(),
        water_level,
        rainfall,
    })
}

/// Loads a template file; the scenario is named after the file stem.
pub fn load_scenario(path: &Path, curve: &RatingCurve) -> Result<RainfallScenario, ForecastError> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let file = std::fs::File::open(path)?;
    read_scenario(&name, file, curve)
}
