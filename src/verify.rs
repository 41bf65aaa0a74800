//! Preflight verification.
//!
//! Checks a configuration against the machine it is about to run on: that the
//! directories and model project files exist, that every rating curve can be
//! inverted, that priority lists name real series, and that scenario files
//! parse. Run it with `--verify` before enabling a new gage or project.

use chrono::Local;
use serde::Serialize;
use std::path::Path;

use crate::analysis::baseflow::load_scenario;
use crate::analysis::rating::{discharge_to_water_level, water_level_to_discharge};
use crate::config::Config;
use crate::gages::{DischargeGage, GageRegistry};
use crate::model::{PREDICTED_SERIES_KEYS, RatingCurve};

/// Water levels (m) used to round-trip each rating curve.
const PROBE_LEVELS: [f64; 3] = [0.5, 2.0, 10.0];
const ROUND_TRIP_TOLERANCE: f64 = 1e-6;

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationStatus {
    Success,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: VerificationStatus,
    pub detail: Option<String>,
}

impl CheckResult {
    fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: VerificationStatus::Success,
            detail: None,
        }
    }

    fn with(name: impl Into<String>, status: VerificationStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GageVerification {
    pub gage_id: String,
    pub status: VerificationStatus,
    pub rating_ok: bool,
    pub unknown_priorities: Vec<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationSummary {
    pub paths_total: usize,
    pub paths_failed: usize,
    pub gages_total: usize,
    pub gages_working: usize,
    pub gages_failed: usize,
    pub scenarios_total: usize,
    pub scenarios_failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub paths: Vec<CheckResult>,
    pub gages: Vec<GageVerification>,
    pub scenarios: Vec<CheckResult>,
    pub summary: VerificationSummary,
}

// ============================================================================
// Paths
// ============================================================================

fn check_dir(name: &str, path: &Path) -> CheckResult {
    if path.is_dir() {
        CheckResult::ok(name)
    } else {
        CheckResult::with(name, VerificationStatus::Failed, format!("{} is not a directory", path.display()))
    }
}

fn check_file(name: &str, path: &Path) -> CheckResult {
    if path.is_file() {
        CheckResult::ok(name)
    } else {
        CheckResult::with(name, VerificationStatus::Failed, format!("{} does not exist", path.display()))
    }
}

/// Commands may be resolved through `PATH`, so a missing file only warns.
fn check_command(name: &str, path: &Path) -> CheckResult {
    if path.is_file() {
        CheckResult::ok(name)
    } else {
        CheckResult::with(
            name,
            VerificationStatus::PartialSuccess,
            format!("{} not found here, assuming it is on PATH", path.display()),
        )
    }
}

pub fn verify_paths(config: &Config) -> Vec<CheckResult> {
    let general = &config.general;
    let sim = &config.simulation;
    let mut checks = vec![
        check_dir("cache_dir", &general.cache_dir),
        check_dir("json_dir", &general.json_dir),
        check_dir("charts_dir", &general.charts_dir),
        check_dir("work_dir", &general.work_dir),
        check_dir("storage data_dir", &config.storage.data_dir),
        check_dir("simulation project_dir", &sim.project_dir),
        check_file("control file", &sim.control_file()),
        check_file("gage registration file", &sim.registry_file()),
        check_file("compute script", &sim.compute_script_path()),
        check_command("simulation command", &sim.command),
        check_command("storage handler", &config.storage.handler),
    ];
    if let Some(tidal) = &config.tidal {
        checks.push(check_command("tide command", &tidal.command));
        checks.push(check_file("tide definition file", &tidal.definition_file));
    }
    checks
}

// ============================================================================
// Gages
// ============================================================================

/// Converts each probe level to discharge and back.
fn rating_round_trip(curve: &RatingCurve) -> Result<(), String> {
    for h in PROBE_LEVELS {
        let q = water_level_to_discharge(curve, h).map_err(|e| e.to_string())?;
        let back = discharge_to_water_level(curve, q).map_err(|e| e.to_string())?;
        if (back - h).abs() > ROUND_TRIP_TOLERANCE {
            return Err(format!("{} m -> {} m3/s -> {} m does not round-trip", h, q, back));
        }
    }
    Ok(())
}

pub fn verify_discharge_gage(gage: &DischargeGage) -> GageVerification {
    let mut result = GageVerification {
        gage_id: gage.id.clone(),
        status: VerificationStatus::Failed,
        rating_ok: false,
        unknown_priorities: Vec::new(),
        error_message: None,
    };

    if let Err(e) = rating_round_trip(&gage.rating) {
        result.error_message = Some(format!("rating curve: {}", e));
        return result;
    }
    result.rating_ok = true;

    result.unknown_priorities = gage
        .priority
        .iter()
        .filter(|name| !PREDICTED_SERIES_KEYS.contains(&name.as_str()))
        .cloned()
        .collect();

    result.status = if !result.unknown_priorities.is_empty() {
        result.error_message = Some(format!("unknown series in priority: {:?}", result.unknown_priorities));
        VerificationStatus::PartialSuccess
    } else if gage.priority.is_empty() {
        result.error_message = Some("empty priority list, the uncorrected series will be published".to_string());
        VerificationStatus::PartialSuccess
    } else {
        VerificationStatus::Success
    };
    result
}

// ============================================================================
// Scenarios
// ============================================================================

pub fn verify_scenarios(config: &Config, gages: &GageRegistry) -> Vec<CheckResult> {
    let paths = &config.simulation.rainfall_scenarios;
    if paths.is_empty() {
        return Vec::new();
    }
    let Some(primary) = gages.primary_discharge() else {
        return vec![CheckResult::with(
            "rainfall scenarios",
            VerificationStatus::Failed,
            "scenarios need a discharge gage rating curve",
        )];
    };
    paths
        .iter()
        .map(|path| {
            let name = path.display().to_string();
            match load_scenario(path, &primary.rating) {
                Ok(s) if s.water_level.is_empty() => {
                    CheckResult::with(name, VerificationStatus::PartialSuccess, "no rows")
                }
                Ok(s) => CheckResult::with(
                    name,
                    VerificationStatus::Success,
                    format!("{} rows, {} with rainfall", s.water_level.len(), s.rainfall.len()),
                ),
                Err(e) => CheckResult::with(name, VerificationStatus::Failed, e.to_string()),
            }
        })
        .collect()
}

// ============================================================================
// Full Verification Runner
// ============================================================================

fn print_check(check: &CheckResult) {
    let detail = check.detail.as_deref().unwrap_or("");
    match check.status {
        VerificationStatus::Success => println!("  ✓ {} {}", check.name, detail),
        VerificationStatus::PartialSuccess => println!("  ⚠ {} ({})", check.name, detail),
        VerificationStatus::Failed => println!("  ✗ {} FAILED: {}", check.name, detail),
    }
}

fn failed(checks: &[CheckResult]) -> usize {
    checks.iter().filter(|c| c.status == VerificationStatus::Failed).count()
}

pub fn run_full_verification(config: &Config, gages: &GageRegistry) -> VerificationReport {
    let mut summary = VerificationSummary::default();

    println!("🔍 Verifying paths...");
    let paths = verify_paths(config);
    paths.iter().for_each(print_check);
    summary.paths_total = paths.len();
    summary.paths_failed = failed(&paths);

    println!("\n🔍 Verifying discharge gages...");
    let mut gage_results = Vec::new();
    for gage in gages.discharge_gages() {
        let result = verify_discharge_gage(gage);
        match result.status {
            VerificationStatus::Success => {
                println!("  ✓ {} ({})", gage.id, gage.rating.kind);
                summary.gages_working += 1;
            }
            VerificationStatus::PartialSuccess => {
                println!("  ⚠ {} ({})", gage.id, result.error_message.as_deref().unwrap_or(""));
                summary.gages_working += 1;
            }
            VerificationStatus::Failed => {
                println!("  ✗ {} FAILED: {}", gage.id, result.error_message.as_deref().unwrap_or("Unknown"));
                summary.gages_failed += 1;
            }
        }
        gage_results.push(result);
    }
    summary.gages_total = gage_results.len();

    let scenarios = verify_scenarios(config, gages);
    if !scenarios.is_empty() {
        println!("\n🔍 Verifying rainfall scenarios...");
        scenarios.iter().for_each(print_check);
    }
    summary.scenarios_total = scenarios.len();
    summary.scenarios_failed = failed(&scenarios);

    VerificationReport {
        timestamp: Local::now().naive_local().format("%Y-%m-%d %H:%M:%S").to_string(),
        paths,
        gages: gage_results,
        scenarios,
        summary,
    }
}

/// True when nothing failed outright and at least one gage can be forecast.
pub fn is_usable(report: &VerificationReport) -> bool {
    let s = &report.summary;
    s.paths_failed == 0 && s.scenarios_failed == 0 && s.gages_working > 0
}

pub fn print_summary(report: &VerificationReport) {
    let s = &report.summary;
    println!("\n═══════════════════════════════════════════════════════════");
    println!("📊 VERIFICATION SUMMARY");
    println!("═══════════════════════════════════════════════════════════");
    println!();
    println!("Paths:            {}/{} ok  ({} failed)", s.paths_total - s.paths_failed, s.paths_total, s.paths_failed);
    println!("Discharge gages:  {}/{} working  ({} failed)", s.gages_working, s.gages_total, s.gages_failed);
    println!(
        "Scenarios:        {}/{} ok  ({} failed)",
        s.scenarios_total - s.scenarios_failed,
        s.scenarios_total,
        s.scenarios_failed
    );
    println!();
    println!("Ready to run: {}", if is_usable(report) { "yes" } else { "NO" });
    println!("═══════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;
    use crate::model::{EquationKind, PREDICTED_OFFSET};
    use std::fs;

    fn gage(rating: RatingCurve, priority: &[&str]) -> DischargeGage {
        DischargeGage {
            id: "Sto_Nino".to_string(),
            device_id: "5678".to_string(),
            location: "Sto. Nino".to_string(),
            province: "Metro Manila".to_string(),
            interval_minutes: 10,
            rating,
            water_level_offset: 0.0,
            tidal_correction: false,
            priority: priority.iter().map(|s| s.to_string()).collect(),
            chart_min: None,
            chart_max: None,
        }
    }

    #[test]
    fn test_valid_gage_succeeds() {
        for kind in [EquationKind::Linear, EquationKind::Exponential, EquationKind::Power, EquationKind::Logarithmic] {
            let result = verify_discharge_gage(&gage(RatingCurve { a: 3.0, b: 0.5, kind }, &[PREDICTED_OFFSET]));
            assert_eq!(result.status, VerificationStatus::Success, "{} curve should verify: {:?}", kind, result);
            assert!(result.rating_ok);
        }
    }

    #[test]
    fn test_zero_coefficient_fails_rating() {
        let result = verify_discharge_gage(&gage(
            RatingCurve { a: 0.0, b: 1.0, kind: EquationKind::Linear },
            &[PREDICTED_OFFSET],
        ));
        assert_eq!(result.status, VerificationStatus::Failed);
        assert!(!result.rating_ok);
        assert!(result.error_message.unwrap().starts_with("rating curve"));
    }

    #[test]
    fn test_unknown_priority_is_partial() {
        let result = verify_discharge_gage(&gage(
            RatingCurve { a: 2.0, b: 1.0, kind: EquationKind::Linear },
            &["Simulated + offset", "Simulated + Magic"],
        ));
        assert_eq!(result.status, VerificationStatus::PartialSuccess);
        assert_eq!(result.unknown_priorities, vec!["Simulated + Magic".to_string()]);
    }

    #[test]
    fn test_paths_report_missing_project_files() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        let checks = verify_paths(&config);
        let control = checks.iter().find(|c| c.name == "control file").unwrap();
        assert_eq!(control.status, VerificationStatus::Failed);
        let handler = checks.iter().find(|c| c.name == "storage handler").unwrap();
        assert_eq!(handler.status, VerificationStatus::PartialSuccess, "commands may live on PATH");
    }

    #[test]
    fn test_full_verification_on_prepared_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for d in ["cache", "json", "charts", "work", "data", "model"] {
            fs::create_dir(root.join(d)).unwrap();
        }
        for f in ["model/marikina.control", "model/marikina.gage", "model/compute.script"] {
            fs::write(root.join(f), "").unwrap();
        }
        fs::write(root.join("storm.csv"), "time,discharge,rain\n2024-01-01 00:00,3.0,1.5\n").unwrap();

        let text = MINIMAL
            .replace("\"cache\"", &format!("{:?}", root.join("cache")))
            .replace("\"json\"", &format!("{:?}", root.join("json")))
            .replace("\"charts\"", &format!("{:?}", root.join("charts")))
            .replace("\"work\"", &format!("{:?}", root.join("work")))
            .replace("\"data\"", &format!("{:?}", root.join("data")))
            .replace("\"model\"", &format!("{:?}", root.join("model")))
            .replace(
                "command = \"model.sh\"",
                &format!("command = \"model.sh\"\nrainfall_scenarios = [{:?}]", root.join("storm.csv")),
            );
        let config = Config::from_toml_str(&text).unwrap();
        let gages = GageRegistry::from_config(&config).unwrap();

        let report = run_full_verification(&config, &gages);
        assert_eq!(report.summary.paths_failed, 0, "paths: {:?}", report.paths);
        assert_eq!(report.summary.gages_working, 1);
        assert_eq!(report.summary.scenarios_total, 1);
        assert_eq!(report.scenarios[0].status, VerificationStatus::Success, "{:?}", report.scenarios);
        assert!(is_usable(&report));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"PartialSuccess\""), "command checks are partial: {}", json);
    }
}
