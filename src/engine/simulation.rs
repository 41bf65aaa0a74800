//! Hydrologic simulation run.
//!
//! Before each run the model's control file gets the cycle's window and the
//! gage registration file gets the location of this cycle's rainfall. Both
//! are line-oriented `Key: value` files edited in place.

use chrono::NaiveDateTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::engine::run_checked;
use crate::logging::{self, DataSource};
use crate::model::ForecastError;

const CONTROL_DATE_FORMAT: &str = "%d %B %Y";
const CONTROL_TIME_FORMAT: &str = "%H:%M";
const REGISTRY_TIME_FORMAT: &str = "%d %B %Y, %H:%M";

/// Key the registration file uses for the storage file location.
const STORAGE_FILE_KEY: &str = "DSS File";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub interval_minutes: u32,
}

/// Where the model finds one precipitation gage's input for this run.
#[derive(Debug, Clone, PartialEq)]
pub struct GageRegistration {
    pub gage: String,
    pub data_type: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub file: PathBuf,
    pub pathname: String,
}

pub trait Simulator {
    /// Runs the model over `window`, blocking until it finishes.
    fn simulate(&self, window: &SimulationWindow, registrations: &[GageRegistration]) -> Result<(), ForecastError>;
}

fn indent_of(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

fn set_value(line: &str, key: &str, value: &str) -> String {
    format!("{}{}: {}", indent_of(line), key, value)
}

fn has_key(line: &str, key: &str) -> bool {
    line.trim_start().starts_with(key)
}

/// Control file with the window's start, end and interval filled in.
pub fn rewrite_control_specs(text: &str, window: &SimulationWindow) -> String {
    let start_date = window.start.format(CONTROL_DATE_FORMAT).to_string();
    let start_time = window.start.format(CONTROL_TIME_FORMAT).to_string();
    let end_date = window.end.format(CONTROL_DATE_FORMAT).to_string();
    let end_time = window.end.format(CONTROL_TIME_FORMAT).to_string();
    let interval = window.interval_minutes.to_string();

    let replacements: [(&str, &str); 5] = [
        ("Start Date", &start_date),
        ("Start Time", &start_time),
        ("End Date", &end_date),
        ("End Time", &end_time),
        ("Time Interval", &interval),
    ];

    text.lines()
        .map(|line| {
            replacements
                .iter()
                .find(|(key, _)| has_key(line, key))
                .map(|(key, value)| set_value(line, key, value))
                .unwrap_or_else(|| line.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Registration file with each registered gage's block pointed at its input.
///
/// Blocks open at `Gage: <id>` and close at `End:`. Gages without a
/// registration are left unchanged.
pub fn rewrite_gage_registry(text: &str, registrations: &[GageRegistration]) -> String {
    let mut out = Vec::new();
    let mut current: Option<&GageRegistration> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        let Some(reg) = current else {
            current = trimmed
                .strip_prefix("Gage:")
                .map(str::trim)
                .and_then(|id| registrations.iter().find(|r| r.gage == id));
            out.push(line.to_string());
            continue;
        };

        let rewritten = if has_key(line, "Data Type") {
            set_value(line, "Data Type", &reg.data_type)
        } else if has_key(line, "Local to Project") {
            set_value(line, "Local to Project", "NO")
        } else if has_key(line, "Start Time") {
            set_value(line, "Start Time", &reg.start.format(REGISTRY_TIME_FORMAT).to_string())
        } else if has_key(line, "End Time") {
            set_value(line, "End Time", &reg.end.format(REGISTRY_TIME_FORMAT).to_string())
        } else if has_key(line, STORAGE_FILE_KEY) {
            set_value(line, STORAGE_FILE_KEY, &reg.file.display().to_string())
        } else if has_key(line, "Pathname") {
            set_value(line, "Pathname", &reg.pathname)
        } else {
            if trimmed.starts_with("End:") {
                current = None;
            }
            line.to_string()
        };
        out.push(rewritten);
    }
    out.join("\n")
}

/// The model invoked as `<command> -s <compute script>` from the project directory.
pub struct EngineProcess {
    pub command: PathBuf,
    pub compute_script: PathBuf,
    pub control_file: PathBuf,
    pub registry_file: PathBuf,
    pub project_dir: PathBuf,
}

impl EngineProcess {
    fn rewrite(path: &Path, f: impl FnOnce(&str) -> String) -> Result<(), ForecastError> {
        let text = fs::read_to_string(path)?;
        fs::write(path, f(&text))?;
        Ok(())
    }
}

impl Simulator for EngineProcess {
    fn simulate(&self, window: &SimulationWindow, registrations: &[GageRegistration]) -> Result<(), ForecastError> {
        Self::rewrite(&self.control_file, |text| rewrite_control_specs(text, window))?;
        Self::rewrite(&self.registry_file, |text| rewrite_gage_registry(text, registrations))?;

        logging::info(
            DataSource::Simulation,
            None,
            &format!("running model {} -> {}", window.start, window.end),
        );
        run_checked(
            "simulation",
            Command::new(&self.command)
                .arg("-s")
                .arg(&self.compute_script)
                .current_dir(&self.project_dir),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn window() -> SimulationWindow {
        SimulationWindow {
            start: dt(1, 0),
            end: dt(3, 12),
            interval_minutes: 10,
        }
    }

    fn registration(gage: &str) -> GageRegistration {
        GageRegistration {
            gage: gage.to_string(),
            data_type: "PER-CUM".to_string(),
            start: dt(1, 0),
            end: dt(2, 6),
            file: PathBuf::from("/data/RIZAL-MONTALBAN-PRECIP-INC.dss"),
            pathname: "/RIZAL/MONTALBAN/PRECIP-INC//IR-MONTH/OBS/".to_string(),
        }
    }

    #[test]
    fn test_control_specs_lines_are_replaced() {
        let text = "Control: Run 1\n     Start Date: 1 January 2000\n     Start Time: 00:00\n     End Date: 2 January 2000\n     End Time: 00:00\n     Time Interval: 60\nEnd:";
        let out = rewrite_control_specs(text, &window());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Control: Run 1");
        assert_eq!(lines[1], "     Start Date: 01 June 2024");
        assert_eq!(lines[2], "     Start Time: 00:00");
        assert_eq!(lines[3], "     End Date: 03 June 2024");
        assert_eq!(lines[4], "     End Time: 12:00");
        assert_eq!(lines[5], "     Time Interval: 10");
        assert_eq!(lines[6], "End:");
    }

    #[test]
    fn test_registry_rewrites_only_registered_blocks() {
        let text = "Gage: Montalban\n     Data Type: PRECIP-INC\n     Local to Project: YES\n     Start Time: 1 January 2000, 00:00\n     End Time: 2 January 2000, 00:00\n     DSS File: old.dss\n     Pathname: /OLD//\nEnd:\n\nGage: Other\n     Data Type: PRECIP-INC\nEnd:";
        let out = rewrite_gage_registry(text, &[registration("Montalban")]);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "     Data Type: PER-CUM");
        assert_eq!(lines[2], "     Local to Project: NO");
        assert_eq!(lines[3], "     Start Time: 01 June 2024, 00:00");
        assert_eq!(lines[4], "     End Time: 02 June 2024, 06:00");
        assert_eq!(lines[5], "     DSS File: /data/RIZAL-MONTALBAN-PRECIP-INC.dss");
        assert_eq!(lines[6], "     Pathname: /RIZAL/MONTALBAN/PRECIP-INC//IR-MONTH/OBS/");
        assert_eq!(lines[7], "End:");
        assert_eq!(lines[10], "     Data Type: PRECIP-INC", "unregistered gage must be untouched");
    }

    #[cfg(unix)]
    #[test]
    fn test_engine_process_rewrites_files_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let control = dir.path().join("run.control");
        let registry = dir.path().join("run.gage");
        fs::write(&control, "Start Date: x\nEnd Date: y").unwrap();
        fs::write(&registry, "Gage: Montalban\n Data Type: x\nEnd:").unwrap();

        let engine = EngineProcess {
            command: PathBuf::from("true"),
            compute_script: PathBuf::from("compute.script"),
            control_file: control.clone(),
            registry_file: registry.clone(),
            project_dir: dir.path().to_path_buf(),
        };
        engine.simulate(&window(), &[registration("Montalban")]).unwrap();

        assert_eq!(fs::read_to_string(&control).unwrap(), "Start Date: 01 June 2024\nEnd Date: 03 June 2024");
        assert!(fs::read_to_string(&registry).unwrap().contains(" Data Type: PER-CUM"));
    }
}
