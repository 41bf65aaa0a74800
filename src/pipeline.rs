//! One forecast cycle.
//!
//! A cycle fetches rainfall and water level, runs the hydrologic model, then
//! corrects and publishes a forecast for every discharge gage. Everything the
//! cycle learns lives in locals and the returned `CycleReport`; nothing is
//! carried over except what the forecast cache persists on disk.
//!
//! Only a failed simulation stops the cycle. Any other failure is logged
//! against its gage and the remaining gages carry on.

use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;

use crate::analysis::baseflow::{
    BaseflowCriteria, RainfallScenario, ScenarioMatch, find_baseflow, inject_scenario_rainfall,
    match_scenario, needs_synthetic_rainfall,
};
use crate::analysis::offset::{AnchorSearch, reconcile};
use crate::analysis::priority::resolve_release;
use crate::analysis::rainfall::{CumulativeRainfall, accumulate};
use crate::analysis::rating::discharge_series_to_water_level;
use crate::analysis::regression::{RegressionFit, regress_predicted};
use crate::analysis::tidal::{TideSpan, correct_for_tide};
use crate::config::Config;
use crate::engine::simulation::{GageRegistration, SimulationWindow, Simulator};
use crate::engine::storage::{
    StoragePayload, StorageRequest, TimeSeriesStore, block_length, observed_rainfall_path,
    observed_water_level_path, simulated_flow_paths,
};
use crate::engine::tide::TideUtility;
use crate::forecast::cache::{ForecastCache, publish_point};
use crate::forecast::export::{ChartBundle, export_discharge, write_chart_bundle, write_forecast_json};
use crate::gages::{DischargeGage, GageRegistry, PrecipGage};
use crate::ingest::sensor::{SensorSource, fetch_rainfall, fetch_water_level};
use crate::logging::{self, DataSource, FailureType, classify_failure};
use crate::model::{
    ACTUAL, ForecastError, OLD_PREDICTED, PREDICTED, PREDICTED_OFFSET, PREDICTED_TIDE,
    PREDICTED_TIDE_OFFSET, REGRESSED, REGRESSED_OFFSET, ReleaseTranslation, SeriesOffset, TIDE,
    TIDE_OFFSET,
};
use crate::series::{SeriesSet, TimeSeries, floor_to_interval, format_timestamp};

/// Offset pairs measured against observed water level, in application order.
pub const OFFSET_PAIRS: [(&str, &str); 4] = [
    (PREDICTED, PREDICTED_OFFSET),
    (REGRESSED, REGRESSED_OFFSET),
    (TIDE, TIDE_OFFSET),
    (PREDICTED_TIDE, PREDICTED_TIDE_OFFSET),
];

const RAINFALL_DATA_TYPE: &str = "PER-CUM";
const RAINFALL_UNITS: &str = "MM";
const WATER_LEVEL_DATA_TYPE: &str = "INST-VAL";
const WATER_LEVEL_UNITS: &str = "M";

// ---------------------------------------------------------------------------
// Cycle context
// ---------------------------------------------------------------------------

/// Time frame of one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleContext {
    /// Cycle time, floored to the interval.
    pub now: NaiveDateTime,
    pub interval_minutes: u32,
    pub sim_start: NaiveDateTime,
    pub sim_end: NaiveDateTime,
    /// Earliest observation used for corrections and charts.
    pub hist_start: NaiveDateTime,
    pub recent_rain: Duration,
    /// Replay cycles may read observations past `now`.
    pub replay: bool,
}

impl CycleContext {
    pub fn new(now: NaiveDateTime, config: &Config) -> Self {
        let interval_minutes = config.general.interval_minutes;
        let c = &config.correction;
        let now = floor_to_interval(now, interval_minutes);
        Self {
            now,
            interval_minutes,
            sim_start: now - Duration::hours(c.sim_past_hours),
            sim_end: now + Duration::hours(c.sim_future_hours),
            hist_start: now - Duration::days(c.history_days),
            recent_rain: Duration::hours(c.recent_rain_hours),
            replay: config.general.replay,
        }
    }

    pub fn label(&self) -> String {
        format_timestamp(self.now)
    }

    pub fn window(&self) -> SimulationWindow {
        SimulationWindow {
            start: self.sim_start,
            end: self.sim_end,
            interval_minutes: self.interval_minutes,
        }
    }

    pub fn anchor_search(&self) -> AnchorSearch {
        AnchorSearch {
            now: self.now,
            step: Duration::minutes(i64::from(self.interval_minutes)),
            window_start: self.hist_start,
        }
    }

    pub fn tide_span(&self) -> TideSpan {
        TideSpan {
            start: self.hist_start,
            end: self.sim_end,
            interval_minutes: self.interval_minutes,
        }
    }

    /// Last timestamp to request water level for.
    pub fn water_level_end(&self) -> NaiveDateTime {
        if self.replay { self.sim_end } else { self.now }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What was published for one discharge gage.
#[derive(Debug, Clone)]
pub struct GageForecast {
    pub gage_id: String,
    pub release: ReleaseTranslation,
    pub regression: Option<RegressionFit>,
    pub offsets: Vec<SeriesOffset>,
    pub published: TimeSeries,
    pub discharge_exported: bool,
}

#[derive(Debug)]
pub struct CycleReport {
    pub now: NaiveDateTime,
    pub forecasts: Vec<GageForecast>,
    pub failures: Vec<(String, ForecastError)>,
}

impl CycleReport {
    pub fn total(&self) -> usize {
        self.forecasts.len() + self.failures.len()
    }

    pub fn forecast_for(&self, gage_id: &str) -> Option<&GageForecast> {
        self.forecasts.iter().find(|f| f.gage_id == gage_id)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// External systems a cycle talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub sensors: &'a dyn SensorSource,
    pub simulator: &'a dyn Simulator,
    pub store: &'a dyn TimeSeriesStore,
    /// Required only when a gage has tidal correction enabled.
    pub tide: Option<&'a dyn TideUtility>,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    gages: &'a GageRegistry,
    scenarios: &'a [RainfallScenario],
    io: Collaborators<'a>,
    cache: ForecastCache,
}

/// Rainfall gathered for one precipitation gage this cycle.
struct GageRainfall<'g> {
    gage: &'g PrecipGage,
    observed: TimeSeries,
    /// What the model receives; differs from `observed` after scenario injection.
    model_input: TimeSeries,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        gages: &'a GageRegistry,
        scenarios: &'a [RainfallScenario],
        io: Collaborators<'a>,
    ) -> Self {
        Self {
            config,
            gages,
            scenarios,
            io,
            cache: ForecastCache::new(&config.general.cache_dir),
        }
    }

    fn criteria(&self) -> BaseflowCriteria {
        BaseflowCriteria {
            kernel_size: self.config.correction.baseflow_kernel_size,
            max_height_diff: self.config.correction.baseflow_max_height_diff,
        }
    }

    pub fn run_cycle(&self, ctx: &CycleContext) -> Result<CycleReport, ForecastError> {
        logging::info(DataSource::System, None, &format!("Starting cycle {}", ctx.label()));

        let mut rainfall = self.gather_rainfall(ctx);
        let water_levels = self.gather_water_levels(ctx);

        if !self.scenarios.is_empty() {
            self.inject_scenarios(ctx, &mut rainfall, &water_levels);
        }

        let registrations = self.store_rainfall(ctx, &rainfall);
        if let Err(e) = self.io.simulator.simulate(&ctx.window(), &registrations) {
            logging::error(DataSource::Simulation, None, &format!("simulation failed, skipping cycle: {}", e));
            return Err(e);
        }

        let rainfall_charts: Vec<(String, CumulativeRainfall)> = rainfall
            .iter()
            .map(|r| (r.gage.id.clone(), accumulate(&r.observed)))
            .collect();

        let mut report = CycleReport {
            now: ctx.now,
            forecasts: Vec::new(),
            failures: Vec::new(),
        };
        for gage in self.gages.discharge_gages() {
            let actual = water_levels.get(gage.id.as_str()).cloned().unwrap_or_default();
            match self.forecast_gage(ctx, gage, actual, &rainfall_charts) {
                Ok(forecast) => report.forecasts.push(forecast),
                Err(e) => {
                    logging::log_gage_failure(DataSource::Pipeline, &gage.id, "forecast", &e);
                    report.failures.push((gage.id.clone(), e));
                }
            }
        }

        logging::log_cycle_summary(&ctx.label(), report.total(), report.forecasts.len(), report.failures.len());
        Ok(report)
    }

    // -- inputs --------------------------------------------------------------

    fn gather_rainfall(&self, ctx: &CycleContext) -> Vec<GageRainfall<'a>> {
        let mut out = Vec::new();
        for gage in self.gages.precip_gages() {
            match fetch_rainfall(self.io.sensors, &gage.device_id, ctx.hist_start, ctx.now) {
                Ok(observed) => {
                    logging::debug(
                        DataSource::Sensor,
                        Some(&gage.id),
                        &format!("{} rainfall samples", observed.len()),
                    );
                    out.push(GageRainfall {
                        gage,
                        model_input: observed.clone(),
                        observed,
                    });
                }
                Err(e) => logging::log_gage_failure(DataSource::Sensor, &gage.id, "rainfall fetch", &e),
            }
        }
        out
    }

    fn gather_water_levels(&self, ctx: &CycleContext) -> BTreeMap<&'a str, TimeSeries> {
        let mut out = BTreeMap::new();
        for gage in self.gages.discharge_gages() {
            let fetched = fetch_water_level(
                self.io.sensors,
                &gage.device_id,
                ctx.hist_start,
                ctx.water_level_end(),
                gage.water_level_offset,
            );
            match fetched {
                Ok(series) => {
                    self.store_water_level(ctx, gage, &series);
                    out.insert(gage.id.as_str(), series);
                }
                Err(e) => logging::log_gage_failure(DataSource::Sensor, &gage.id, "water level fetch", &e),
            }
        }
        out
    }

    fn store_water_level(&self, ctx: &CycleContext, gage: &DischargeGage, series: &TimeSeries) {
        let path = observed_water_level_path(&gage.province, &gage.location, ctx.hist_start, ctx.water_level_end());
        let request = StorageRequest::update(
            self.config.storage.data_dir.join(path.file_name()),
            path.pathname(),
            StoragePayload {
                data: series.clone(),
                data_type: WATER_LEVEL_DATA_TYPE.to_string(),
                units: WATER_LEVEL_UNITS.to_string(),
                interval_minutes: ctx.interval_minutes,
            },
        );
        if let Err(e) = self.io.store.execute(&request) {
            logging::log_gage_failure(DataSource::Storage, &gage.id, "water level store", &e);
        }
    }

    /// Finds the scenario continuing from the primary gage's baseflow.
    fn scenario_match(
        &self,
        ctx: &CycleContext,
        water_levels: &BTreeMap<&str, TimeSeries>,
    ) -> Option<(ScenarioMatch, NaiveDateTime)> {
        let primary = self.gages.primary_discharge()?;
        let observed = water_levels.get(primary.id.as_str())?.until(ctx.now);
        let criteria = self.criteria();

        let Some(baseflow) = find_baseflow(&observed, &criteria) else {
            logging::debug(DataSource::Pipeline, Some(&primary.id), "no baseflow found");
            return None;
        };
        let matched = match_scenario(self.scenarios, baseflow.level, &criteria)?;
        logging::info(
            DataSource::Pipeline,
            Some(&primary.id),
            &format!(
                "baseflow {:.3} m at {} matches scenario '{}' at +{} min (diff {:.3})",
                baseflow.level,
                baseflow.time,
                matched.scenario,
                matched.reference.num_minutes(),
                matched.height_diff
            ),
        );
        Some((matched, baseflow.time))
    }

    fn inject_scenarios(
        &self,
        ctx: &CycleContext,
        rainfall: &mut [GageRainfall<'a>],
        water_levels: &BTreeMap<&str, TimeSeries>,
    ) {
        if !rainfall
            .iter()
            .any(|r| needs_synthetic_rainfall(&r.observed, ctx.now, ctx.recent_rain))
        {
            return;
        }
        let Some((matched, baseflow_time)) = self.scenario_match(ctx, water_levels) else {
            return;
        };
        let Some(scenario) = self.scenarios.iter().find(|s| s.name == matched.scenario) else {
            return;
        };
        for r in rainfall.iter_mut() {
            if needs_synthetic_rainfall(&r.observed, ctx.now, ctx.recent_rain) {
                r.model_input = inject_scenario_rainfall(&r.observed, scenario, matched.reference, baseflow_time);
                logging::info(
                    DataSource::Pipeline,
                    Some(&r.gage.id),
                    &format!("rainfall extended with scenario '{}'", scenario.name),
                );
            }
        }
    }

    /// Writes each gage's model rainfall to the store and returns the
    /// registrations that point the model at it.
    fn store_rainfall(&self, ctx: &CycleContext, rainfall: &[GageRainfall<'a>]) -> Vec<GageRegistration> {
        let mut registrations = Vec::new();
        for r in rainfall {
            let path = observed_rainfall_path(&r.gage.province, &r.gage.location, ctx.sim_start, ctx.sim_end);
            let file = self.config.storage.data_dir.join(path.file_name());
            let request = StorageRequest::write(
                file.clone(),
                path.pathname(),
                StoragePayload {
                    data: r.model_input.range(ctx.sim_start, ctx.sim_end),
                    data_type: RAINFALL_DATA_TYPE.to_string(),
                    units: RAINFALL_UNITS.to_string(),
                    interval_minutes: ctx.interval_minutes,
                },
            );
            match self.io.store.execute(&request) {
                Ok(_) => registrations.push(GageRegistration {
                    gage: r.gage.id.clone(),
                    data_type: RAINFALL_DATA_TYPE.to_string(),
                    start: ctx.sim_start,
                    end: ctx.sim_end,
                    file,
                    pathname: path.pathname(),
                }),
                Err(e) => logging::log_gage_failure(DataSource::Storage, &r.gage.id, "rainfall store", &e),
            }
        }
        logging::debug(
            DataSource::Storage,
            None,
            &format!(
                "{} rainfall gages registered ({} block)",
                registrations.len(),
                block_length(ctx.sim_start, ctx.sim_end)
            ),
        );
        registrations
    }

    // -- per-gage correction -------------------------------------------------

    fn simulated_water_level(&self, ctx: &CycleContext, gage: &DischargeGage) -> Result<TimeSeries, ForecastError> {
        let paths = simulated_flow_paths(
            &gage.id,
            &self.config.simulation.project_name,
            ctx.sim_start,
            ctx.sim_end,
            ctx.interval_minutes,
        );
        let request = StorageRequest::read(self.config.simulation.output_file(), paths, ctx.sim_start, ctx.sim_end);
        let discharge = self.io.store.execute(&request)?.into_series()?;
        discharge_series_to_water_level(&gage.rating, &discharge)
    }

    fn apply_tide(
        &self,
        ctx: &CycleContext,
        gage: &DischargeGage,
        actual: &TimeSeries,
        series: &mut SeriesSet,
    ) -> Result<(), ForecastError> {
        let utility = self.io.tide.ok_or_else(|| {
            ForecastError::Config(format!("gage {} needs tidal correction but no tide utility is set", gage.id))
        })?;
        let predicted = series.get(PREDICTED).cloned().unwrap_or_default();
        match correct_for_tide(utility, actual, &predicted, ctx.now, &ctx.tide_span()) {
            Ok(correction) => {
                logging::debug(
                    DataSource::Tide,
                    Some(&gage.id),
                    &format!("tide average {:.3} m", correction.average),
                );
                series.insert(TIDE, correction.tide);
                series.insert(PREDICTED_TIDE, correction.corrected);
                Ok(())
            }
            Err(e) if classify_failure(&e) == FailureType::Expected => {
                logging::log_gage_failure(DataSource::Tide, &gage.id, "tidal correction", &e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn forecast_gage(
        &self,
        ctx: &CycleContext,
        gage: &DischargeGage,
        actual: TimeSeries,
        rainfall_charts: &[(String, CumulativeRainfall)],
    ) -> Result<GageForecast, ForecastError> {
        let predicted = self.simulated_water_level(ctx, gage)?;
        let mut series = SeriesSet::new();
        series.insert(PREDICTED, predicted.clone());

        let mut regression = None;
        let mut offsets = Vec::new();

        if actual.is_empty() {
            logging::warn(DataSource::Pipeline, Some(&gage.id), "no observed water level, publishing uncorrected");
        } else {
            match regress_predicted(&predicted, &actual) {
                Ok((fit, corrected)) => {
                    logging::debug(
                        DataSource::Pipeline,
                        Some(&gage.id),
                        &format!(
                            "regression slope {:.4} intercept {:.4} over {} samples",
                            fit.slope, fit.intercept, fit.samples
                        ),
                    );
                    regression = Some(fit);
                    series.insert(REGRESSED, corrected);
                }
                Err(e) => logging::log_gage_failure(DataSource::Pipeline, &gage.id, "regression", &e),
            }

            if gage.tidal_correction {
                self.apply_tide(ctx, gage, &actual, &mut series)?;
            }

            match reconcile(
                &mut series,
                &actual,
                &OFFSET_PAIRS,
                &ctx.anchor_search(),
                self.config.correction.offset_scope,
            ) {
                Ok(found) => offsets = found,
                Err(e) if classify_failure(&e) == FailureType::Expected => {
                    logging::log_gage_failure(DataSource::Pipeline, &gage.id, "offset reconciliation", &e);
                }
                Err(e) => return Err(e),
            }
            for offset in &offsets {
                logging::debug(
                    DataSource::Pipeline,
                    Some(&gage.id),
                    &format!("{} -> {}: {:+.3} m at {}", offset.source, offset.destination, offset.value, offset.anchor),
                );
            }
        }
        series.insert(ACTUAL, actual);

        let cached = match self.cache.load(&gage.location) {
            Ok(cached) => cached,
            Err(e) => {
                logging::log_gage_failure(DataSource::Pipeline, &gage.id, "forecast cache load", &e);
                TimeSeries::new()
            }
        };
        series.insert(OLD_PREDICTED, cached.clone());

        let release = resolve_release(
            &gage.id,
            &gage.priority,
            &series,
            self.config.correction.priority_fallback,
        )?;
        let published = series
            .get(&release.predicted)
            .cloned()
            .ok_or_else(|| ForecastError::DataNotFound(format!("series '{}' vanished", release.predicted)))?;

        let general = &self.config.general;
        write_forecast_json(&general.json_dir, &gage.location, &published)?;
        let cached = publish_point(&cached, &published, ctx.now, ctx.hist_start);
        self.cache.store(&gage.location, &cached)?;
        series.insert(OLD_PREDICTED, cached);

        let chart = ChartBundle::build(gage, &release, &series, rainfall_charts, ctx.now, ctx.hist_start, ctx.sim_end);
        write_chart_bundle(&general.charts_dir, &chart)?;

        let discharge_exported =
            match export_discharge(self.io.store, gage, &published, ctx.now, &self.config.storage.data_dir) {
                Ok(_) => true,
                Err(e) => {
                    logging::log_gage_failure(DataSource::Storage, &gage.id, "discharge export", &e);
                    false
                }
            };

        logging::info(
            DataSource::Pipeline,
            Some(&gage.id),
            &format!("published '{}' ({} points)", release.predicted, published.len()),
        );

        Ok(GageForecast {
            gage_id: gage.id.clone(),
            release,
            regression,
            offsets,
            published,
            discharge_exported,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::MINIMAL;
    use chrono::NaiveDate;

    fn config() -> Config {
        Config::from_toml_str(MINIMAL).unwrap()
    }

    #[test]
    fn test_context_windows_follow_correction_config() {
        let raw = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap().and_hms_opt(10, 47, 31).unwrap();
        let ctx = CycleContext::new(raw, &config());
        let now = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap().and_hms_opt(10, 40, 0).unwrap();

        assert_eq!(ctx.now, now, "now is floored to the interval");
        assert_eq!(ctx.sim_start, now - Duration::hours(36));
        assert_eq!(ctx.sim_end, now + Duration::hours(24));
        assert_eq!(ctx.hist_start, now - Duration::days(7));
        assert_eq!(ctx.recent_rain, Duration::hours(12));
        assert_eq!(ctx.water_level_end(), now, "live cycles stop water level at now");
    }

    #[test]
    fn test_context_derived_parameters() {
        let raw = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let mut ctx = CycleContext::new(raw, &config());

        let search = ctx.anchor_search();
        assert_eq!(search.step, Duration::minutes(10));
        assert_eq!(search.window_start, ctx.hist_start);

        let span = ctx.tide_span();
        assert_eq!((span.start, span.end), (ctx.hist_start, ctx.sim_end));

        let window = ctx.window();
        assert_eq!(window.interval_minutes, 10);

        ctx.replay = true;
        assert_eq!(ctx.water_level_end(), ctx.sim_end, "replay cycles read observations to the simulation end");
    }

    #[test]
    fn test_offset_pairs_cover_every_predicted_source() {
        for (source, destination) in OFFSET_PAIRS {
            assert!(crate::model::PREDICTED_SERIES_KEYS.contains(&source));
            assert!(crate::model::PREDICTED_SERIES_KEYS.contains(&destination));
        }
    }
}
