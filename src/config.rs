//! Service configuration.
//!
//! Read from a TOML file at startup. Repository credentials are not stored
//! here; the config names environment variables, which `Config::load` fills
//! from a `.env` file next to the working directory when one exists.
//!
//! ```toml
//! [general]
//! cache_dir = "cache"
//! json_dir = "json"
//! charts_dir = "charts"
//! work_dir = "work"
//! interval_minutes = 10
//!
//! [simulation]
//! project_dir = "model"
//! project_name = "marikina"
//! command = "model.sh"
//!
//! [storage]
//! handler = "storage_handler.sh"
//! data_dir = "data"
//!
//! [[precip_gages]]
//! id = "Montalban"
//! device_id = "1234"
//! location = "Montalban"
//! province = "Rizal"
//!
//! [[discharge_gages]]
//! id = "Sto_Nino"
//! device_id = "5678"
//! location = "Sto. Nino"
//! province = "Metro Manila"
//! rating = { a = 9.1, b = 1.7, equation = "POW" }
//! priority = ["Simulated w/ LinearRegress(x-P,y-A) + offset", "Simulated + offset"]
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::logging::LogLevel;
use crate::model::{ForecastError, OffsetScope, PriorityFallback, RatingCurve};

fn parse_minute_time<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M").map_err(serde::de::Error::custom))
        .transpose()
}

fn default_interval() -> u32 {
    10
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Forecast cache (`<location>_predicted.json`).
    pub cache_dir: PathBuf,
    /// Latest forecast per gage.
    pub json_dir: PathBuf,
    /// Chart bundles.
    pub charts_dir: PathBuf,
    /// Scratch space for external tool files.
    pub work_dir: PathBuf,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    /// Replays `start_time..=end_time` instead of following the wall clock.
    #[serde(default)]
    pub replay: bool,
    #[serde(default, deserialize_with = "parse_minute_time")]
    pub start_time: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "parse_minute_time")]
    pub end_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    "https://repository.example.net/api/data".to_string()
}

fn default_user_var() -> String {
    "FLOWCAST_REPO_USER".to_string()
}

fn default_password_var() -> String {
    "FLOWCAST_REPO_PASS".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    5
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the repository user.
    #[serde(default = "default_user_var")]
    pub user_var: String,
    #[serde(default = "default_password_var")]
    pub password_var: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_var: default_user_var(),
            password_var: default_password_var(),
            retries: default_retries(),
            retry_interval_secs: default_retry_interval(),
            timeout_secs: default_timeout(),
            proxy: None,
        }
    }
}

fn default_compute_script() -> PathBuf {
    PathBuf::from("compute.script")
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub project_dir: PathBuf,
    pub project_name: String,
    /// Model launcher.
    pub command: PathBuf,
    /// Relative to `project_dir`.
    #[serde(default = "default_compute_script")]
    pub compute_script: PathBuf,
    /// Storm templates used when rain has just stopped.
    #[serde(default)]
    pub rainfall_scenarios: Vec<PathBuf>,
}

impl SimulationConfig {
    pub fn control_file(&self) -> PathBuf {
        self.project_dir.join(format!("{}.control", self.project_name))
    }

    pub fn registry_file(&self) -> PathBuf {
        self.project_dir.join(format!("{}.gage", self.project_name))
    }

    /// Store file the model writes simulated flow to.
    pub fn output_file(&self) -> PathBuf {
        self.project_dir.join(format!("{}.dss", self.project_name))
    }

    pub fn compute_script_path(&self) -> PathBuf {
        self.project_dir.join(&self.compute_script)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub handler: PathBuf,
    /// Where observed series and forecast exports are stored.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TidalConfig {
    pub command: PathBuf,
    /// Constituent definition file for the analysis step.
    pub definition_file: PathBuf,
}

fn default_kernel_size() -> usize {
    crate::analysis::baseflow::DEFAULT_KERNEL_SIZE
}

fn default_max_height_diff() -> f64 {
    crate::analysis::baseflow::DEFAULT_MAX_HEIGHT_DIFF
}

fn default_recent_rain_hours() -> i64 {
    12
}

fn default_sim_past_hours() -> i64 {
    36
}

fn default_sim_future_hours() -> i64 {
    24
}

fn default_history_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionConfig {
    #[serde(default)]
    pub offset_scope: OffsetScope,
    #[serde(default)]
    pub priority_fallback: PriorityFallback,
    #[serde(default = "default_kernel_size")]
    pub baseflow_kernel_size: usize,
    #[serde(default = "default_max_height_diff")]
    pub baseflow_max_height_diff: f64,
    #[serde(default = "default_recent_rain_hours")]
    pub recent_rain_hours: i64,
    #[serde(default = "default_sim_past_hours")]
    pub sim_past_hours: i64,
    #[serde(default = "default_sim_future_hours")]
    pub sim_future_hours: i64,
    #[serde(default = "default_history_days")]
    pub history_days: i64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            offset_scope: OffsetScope::default(),
            priority_fallback: PriorityFallback::default(),
            baseflow_kernel_size: default_kernel_size(),
            baseflow_max_height_diff: default_max_height_diff(),
            recent_rain_hours: default_recent_rain_hours(),
            sim_past_hours: default_sim_past_hours(),
            sim_future_hours: default_sim_future_hours(),
            history_days: default_history_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrecipGageConfig {
    pub id: String,
    pub device_id: String,
    pub location: String,
    pub province: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DischargeGageConfig {
    pub id: String,
    pub device_id: String,
    pub location: String,
    pub province: String,
    pub rating: RatingCurve,
    /// Metres added to every water-level reading.
    #[serde(default)]
    pub water_level_offset: f64,
    #[serde(default)]
    pub tidal_correction: bool,
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(default)]
    pub chart_min: Option<f64>,
    #[serde(default)]
    pub chart_max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub general: GeneralConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    pub simulation: SimulationConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub tidal: Option<TidalConfig>,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub precip_gages: Vec<PrecipGageConfig>,
    #[serde(default)]
    pub discharge_gages: Vec<DischargeGageConfig>,
}

impl Config {
    /// Loads `.env` (if any) and parses the config file.
    pub fn load(path: &Path) -> Result<Self, ForecastError> {
        dotenv::dotenv().ok();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ForecastError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ForecastError> {
        let config: Config = toml::from_str(text).map_err(|e| ForecastError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ForecastError> {
        let fail = |msg: String| Err(ForecastError::Config(msg));

        if self.general.interval_minutes == 0 || 60 % self.general.interval_minutes != 0 {
            return fail(format!(
                "interval_minutes must divide an hour, got {}",
                self.general.interval_minutes
            ));
        }
        if self.general.replay {
            match (self.general.start_time, self.general.end_time) {
                (Some(start), Some(end)) if start <= end => {}
                (Some(_), Some(_)) => return fail("start_time is after end_time".to_string()),
                _ => return fail("replay needs both start_time and end_time".to_string()),
            }
        }
        if self.discharge_gages.is_empty() {
            return fail("at least one discharge gage is required".to_string());
        }
        if self.discharge_gages.iter().any(|g| g.tidal_correction) && self.tidal.is_none() {
            return fail("tidal_correction is enabled but [tidal] is missing".to_string());
        }
        let c = &self.correction;
        if c.sim_past_hours <= 0 || c.sim_future_hours <= 0 || c.history_days <= 0 || c.recent_rain_hours <= 0 {
            return fail("correction windows must be positive".to_string());
        }
        if c.baseflow_max_height_diff < 0.0 {
            return fail("baseflow_max_height_diff must not be negative".to_string());
        }
        Ok(())
    }
}
