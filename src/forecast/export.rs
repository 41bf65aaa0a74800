//! Forecast outputs for a single discharge gage.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::analysis::rainfall::CumulativeRainfall;
use crate::analysis::rating::water_level_series_to_discharge;
use crate::engine::storage::{StoragePayload, StorageRequest, TimeSeriesStore, forecast_flow_path};
use crate::forecast::{keyed_values, sanitize_location, write_json};
use crate::gages::DischargeGage;
use crate::model::{ForecastError, ReleaseTranslation};
use crate::series::{SeriesSet, TimeSeries, format_timestamp};

/// Decimal places kept in chart values.
pub const CHART_DECIMALS: i32 = 3;

pub const DISCHARGE_DATA_TYPE: &str = "INST-VAL";
pub const DISCHARGE_UNITS: &str = "m3/s";

// ---------------------------------------------------------------------------
// Latest forecast
// ---------------------------------------------------------------------------

/// Writes `<json_dir>/<location>.json` holding the published series.
pub fn write_forecast_json(json_dir: &Path, location: &str, published: &TimeSeries) -> Result<PathBuf, ForecastError> {
    let path = json_dir.join(format!("{}.json", sanitize_location(location)));
    write_json(&path, &keyed_values(published, None))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Chart bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RainfallChart {
    pub gage: String,
    /// Window label (`1h`, `3h`, ...) to cumulative values.
    pub windows: BTreeMap<String, BTreeMap<String, f64>>,
}

/// Everything a chart renderer needs for one gage and cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBundle {
    pub gage: String,
    pub location: String,
    pub now: String,
    pub start: String,
    pub end: String,
    pub chart_min: Option<f64>,
    pub chart_max: Option<f64>,
    /// Role label (`Actual`, `Predicted`, `Old Predicted`) to values.
    pub series: BTreeMap<String, BTreeMap<String, f64>>,
    /// Every computed series under its own name, for diagnosis.
    pub debug_series: BTreeMap<String, BTreeMap<String, f64>>,
    pub rainfall: Vec<RainfallChart>,
}

impl ChartBundle {
    /// Assembles the bundle, clipping every series to `start..=end`.
    pub fn build(
        gage: &DischargeGage,
        release: &ReleaseTranslation,
        series: &SeriesSet,
        rainfall: &[(String, CumulativeRainfall)],
        now: NaiveDateTime,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Self {
        let clip = |s: &TimeSeries| keyed_values(&s.range(start, end), Some(CHART_DECIMALS));

        let roles = release
            .iter()
            .filter_map(|(role, name)| series.get(name).map(|s| (role.to_string(), clip(s))))
            .collect();

        let debug_series = series.iter().map(|(name, s)| (name.to_string(), clip(s))).collect();

        let rainfall = rainfall
            .iter()
            .map(|(gage_id, cumulative)| RainfallChart {
                gage: gage_id.clone(),
                windows: cumulative
                    .iter()
                    .map(|(hours, s)| (format!("{}h", hours), clip(s)))
                    .collect(),
            })
            .collect();

        Self {
            gage: gage.id.clone(),
            location: gage.location.clone(),
            now: format_timestamp(now),
            start: format_timestamp(start),
            end: format_timestamp(end),
            chart_min: gage.chart_min,
            chart_max: gage.chart_max,
            series: roles,
            debug_series,
            rainfall,
        }
    }
}

/// Writes `<charts_dir>/<location>_chart.json`.
pub fn write_chart_bundle(charts_dir: &Path, bundle: &ChartBundle) -> Result<PathBuf, ForecastError> {
    let path = charts_dir.join(format!("{}_chart.json", sanitize_location(&bundle.location)));
    write_json(&path, bundle)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Discharge for the hydraulic model
// ---------------------------------------------------------------------------

/// Converts the published water level to discharge and writes it to the store
/// under `/PROVINCE/LOCATION/FLOW/<date>/<n>MIN/FORECAST/`.
///
/// Any sample outside the rating curve's domain aborts the export.
pub fn export_discharge(
    store: &dyn TimeSeriesStore,
    gage: &DischargeGage,
    published: &TimeSeries,
    now: NaiveDateTime,
    data_dir: &Path,
) -> Result<TimeSeries, ForecastError> {
    let discharge = water_level_series_to_discharge(&gage.rating, published)?;
    let path = forecast_flow_path(&gage.province, &gage.location, now, gage.interval_minutes);
    let request = StorageRequest::write(
        data_dir.join(path.file_name()),
        path.pathname(),
        StoragePayload {
            data: discharge.clone(),
            data_type: DISCHARGE_DATA_TYPE.to_string(),
            units: DISCHARGE_UNITS.to_string(),
            interval_minutes: gage.interval_minutes,
        },
    );
    store.execute(&request)?;
    Ok(discharge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rainfall::accumulate;
    use crate::engine::storage::{StorageAction, StorageResponse};
    use crate::model::{ACTUAL, EquationKind, OLD_PREDICTED, PREDICTED, PREDICTED_OFFSET, RatingCurve};
    use chrono::{Duration, NaiveDate};
    use std::cell::RefCell;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, 20).unwrap().and_hms_opt(6, 0, 0).unwrap()
    }

    fn gage() -> DischargeGage {
        DischargeGage {
            id: "Sto_Nino".to_string(),
            device_id: "5678".to_string(),
            location: "Sto. Nino".to_string(),
            province: "Metro Manila".to_string(),
            interval_minutes: 10,
            rating: RatingCurve { a: 2.0, b: 1.0, kind: EquationKind::Linear },
            water_level_offset: 0.0,
            tidal_correction: false,
            priority: vec![PREDICTED_OFFSET.to_string()],
            chart_min: Some(10.0),
            chart_max: Some(20.0),
        }
    }

    struct RecordingStore {
        requests: RefCell<Vec<StorageRequest>>,
    }

    impl TimeSeriesStore for RecordingStore {
        fn execute(&self, request: &StorageRequest) -> Result<StorageResponse, ForecastError> {
            self.requests.borrow_mut().push(request.clone());
            Ok(StorageResponse::default())
        }
    }

    #[test]
    fn test_forecast_json_is_keyed_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let published: TimeSeries = [(t0(), 12.25)].into_iter().collect();
        let path = write_forecast_json(dir.path(), "Sto. Nino", &published).unwrap();
        assert_eq!(path, dir.path().join("sto._nino.json"));

        let parsed: BTreeMap<String, f64> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.get("2024-08-20 06:00:00"), Some(&12.25));
    }

    #[test]
    fn test_chart_bundle_maps_roles_and_clips_window() {
        let mut series = SeriesSet::new();
        series.insert(ACTUAL, [(t0(), 12.0), (t0() - Duration::days(9), 9.0)].into_iter().collect());
        series.insert(PREDICTED, [(t0(), 11.5)].into_iter().collect());
        series.insert(PREDICTED_OFFSET, [(t0(), 12.00049)].into_iter().collect());
        series.insert(OLD_PREDICTED, TimeSeries::new());
        let release = ReleaseTranslation {
            actual: ACTUAL.to_string(),
            predicted: PREDICTED_OFFSET.to_string(),
            old_predicted: OLD_PREDICTED.to_string(),
        };
        let rain: TimeSeries = [(t0() - Duration::minutes(30), 2.0)].into_iter().collect();

        let bundle = ChartBundle::build(
            &gage(),
            &release,
            &series,
            &[("Montalban".to_string(), accumulate(&rain))],
            t0(),
            t0() - Duration::days(7),
            t0() + Duration::days(1),
        );

        let predicted = &bundle.series["Predicted"];
        assert_eq!(predicted.get("2024-08-20 06:00:00"), Some(&12.0), "values rounded to 3 places");
        assert_eq!(bundle.series["Actual"].len(), 1, "points before the window are clipped");
        assert!(bundle.series.contains_key("Old Predicted"));
        assert_eq!(bundle.debug_series.len(), 4);
        assert_eq!(bundle.rainfall[0].windows["1h"].get("2024-08-20 06:00:00"), Some(&2.0));
        assert_eq!(bundle.rainfall[0].windows.len(), 5);
        assert_eq!(bundle.chart_max, Some(20.0));
    }

    #[test]
    fn test_chart_bundle_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ChartBundle::build(
            &gage(),
            &ReleaseTranslation {
                actual: ACTUAL.to_string(),
                predicted: PREDICTED.to_string(),
                old_predicted: OLD_PREDICTED.to_string(),
            },
            &SeriesSet::new(),
            &[],
            t0(),
            t0(),
            t0(),
        );
        let path = write_chart_bundle(dir.path(), &bundle).unwrap();
        assert_eq!(path, dir.path().join("sto._nino_chart.json"));
        assert!(path.exists());
    }

    #[test]
    fn test_export_discharge_writes_forecast_path() {
        let store = RecordingStore { requests: RefCell::new(Vec::new()) };
        let published: TimeSeries = [(t0(), 3.0), (t0() + Duration::minutes(10), 4.0)].into_iter().collect();

        let discharge = export_discharge(&store, &gage(), &published, t0(), Path::new("/data")).unwrap();
        assert_eq!(discharge.get(t0()), Some(7.0), "q = 2h + 1");

        let requests = store.requests.borrow();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.action, StorageAction::Write);
        assert_eq!(request.paths, vec!["/METRO_MANILA/STO._NINO/FLOW/20AUG2024/10MIN/FORECAST/".to_string()]);
        assert_eq!(request.file, PathBuf::from("/data/METRO_MANILA-STO._NINO-FLOW.dss"));
        assert_eq!(request.payload.as_ref().map(|p| p.units.as_str()), Some(DISCHARGE_UNITS));
    }

    #[test]
    fn test_export_discharge_rejects_out_of_domain_level() {
        let store = RecordingStore { requests: RefCell::new(Vec::new()) };
        let mut g = gage();
        g.rating = RatingCurve { a: 5.0, b: 1.0, kind: EquationKind::Logarithmic };
        let published: TimeSeries = [(t0(), -1.0)].into_iter().collect();

        let err = export_discharge(&store, &g, &published, t0(), Path::new("/data")).unwrap_err();
        assert!(matches!(err, ForecastError::Domain(_)), "got {:?}", err);
        assert!(store.requests.borrow().is_empty(), "nothing is written after a domain error");
    }
}
