//! Harmonic tide analysis and prediction through an external utility.
//!
//! The utility runs twice: `analysis` fits constituents to observed water
//! level, `prediction` evaluates them over the requested span. Files are
//! whitespace separated `time value` lines.

use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::analysis::tidal::TideSpan;
use crate::engine::run_checked;
use crate::logging::{self, DataSource};
use crate::model::ForecastError;
use crate::series::TimeSeries;

const OBSERVED_FILE: &str = "water_level_actual.txt";
const CONSTITUENTS_FILE: &str = "water_level.xml";
const PREDICTION_FILE: &str = "water_level_predict.csv";

const PREDICTION_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub trait TideUtility {
    fn predict(&self, observed: &TimeSeries, span: &TideSpan) -> Result<TimeSeries, ForecastError>;
}

/// Writes `observed` as `YYYY-mm-dd HH:MM:SS value` lines.
pub fn write_observed<W: std::io::Write>(observed: &TimeSeries, writer: W) -> Result<(), ForecastError> {
    let mut out = csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_writer(writer);
    for (t, v) in observed.iter() {
        out.write_record([
            t.format("%Y-%m-%d").to_string(),
            t.format("%H:%M:%S").to_string(),
            v.to_string(),
        ])?;
    }
    out.flush()?;
    Ok(())
}

/// Parses prediction output; blank lines are skipped.
pub fn read_prediction<R: std::io::Read>(reader: R) -> Result<TimeSeries, ForecastError> {
    let mut input = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut tide = TimeSeries::new();
    for record in input.records() {
        let record = record?;
        let mut fields = record.iter().filter(|f| !f.is_empty());
        let (Some(time), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let t = NaiveDateTime::parse_from_str(time, PREDICTION_TIME_FORMAT)
            .map_err(|e| ForecastError::Parse(format!("tide time '{}': {}", time, e)))?;
        let v: f64 = value
            .parse()
            .map_err(|_| ForecastError::Parse(format!("tide value '{}'", value)))?;
        tide.insert(t, v);
    }
    Ok(tide)
}

pub struct HarmonicTideProcess {
    command: PathBuf,
    definition_file: PathBuf,
    work_dir: PathBuf,
}

impl HarmonicTideProcess {
    pub fn new(command: impl Into<PathBuf>, definition_file: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            definition_file: definition_file.into(),
            work_dir: work_dir.into(),
        }
    }

    fn cleanup(&self, files: &[&Path]) {
        for file in files {
            if let Err(e) = fs::remove_file(file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    logging::warn(DataSource::Tide, None, &format!("could not remove {}: {}", file.display(), e));
                }
            }
        }
    }

    fn run(
        &self,
        observed: &TimeSeries,
        files: [&Path; 3],
        span: &TideSpan,
    ) -> Result<TimeSeries, ForecastError> {
        let [observed_file, constituents, prediction] = files;
        write_observed(observed, fs::File::create(observed_file)?)?;
        run_checked(
            "tide analysis",
            Command::new(&self.command)
                .arg("analysis")
                .arg(observed_file)
                .arg("--def_filename")
                .arg(&self.definition_file)
                .arg("--outputxml")
                .arg(constituents)
                .current_dir(&self.work_dir),
        )?;
        run_checked(
            "tide prediction",
            Command::new(&self.command)
                .arg("prediction")
                .arg(constituents)
                .arg(span.start.format(PREDICTION_TIME_FORMAT).to_string())
                .arg(span.end.format(PREDICTION_TIME_FORMAT).to_string())
                .arg(span.interval_minutes.to_string())
                .arg("--fname")
                .arg(prediction)
                .current_dir(&self.work_dir),
        )?;
        let tide = read_prediction(fs::File::open(prediction)?)?;
        if tide.is_empty() {
            return Err(ForecastError::DataNotFound(
                "tide utility produced no prediction".to_string(),
            ));
        }
        Ok(tide)
    }
}

impl TideUtility for HarmonicTideProcess {
    fn predict(&self, observed: &TimeSeries, span: &TideSpan) -> Result<TimeSeries, ForecastError> {
        let observed_file = self.work_dir.join(OBSERVED_FILE);
        let constituents = self.work_dir.join(CONSTITUENTS_FILE);
        let prediction = self.work_dir.join(PREDICTION_FILE);
        let files = [observed_file.as_path(), constituents.as_path(), prediction.as_path()];

        logging::debug(
            DataSource::Tide,
            None,
            &format!("{} observed points, predicting {} -> {}", observed.len(), span.start, span.end),
        );
        let result = self.run(observed, files, span);
        self.cleanup(&files);
        result
    }
}
