/// Forecast assembly: everything written out once a gage's series are final.
///
/// Submodules:
/// - `cache`:  the rolling record of past published forecasts
/// - `export`: latest forecast JSON, chart bundle, discharge for the hydraulic model
///
/// All JSON files key values by `YYYY-mm-dd HH:MM:SS` strings.

pub mod cache;
pub mod export;

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::model::ForecastError;
use crate::series::{TimeSeries, format_timestamp};

/// File-name form of a gage location: `Sto. Nino` becomes `sto._nino`.
pub fn sanitize_location(location: &str) -> String {
    location.replace(' ', "_").replace(',', "").to_lowercase()
}

/// `series` as a string-keyed map, optionally rounded to `decimals` places.
pub fn keyed_values(series: &TimeSeries, decimals: Option<i32>) -> BTreeMap<String, f64> {
    series
        .iter()
        .map(|(t, v)| {
            let v = match decimals {
                Some(d) => round_to(v, d),
                None => v,
            };
            (format_timestamp(t), v)
        })
        .collect()
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (v * scale).round() / scale
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ForecastError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_sanitize_location() {
        assert_eq!(sanitize_location("Sto. Nino"), "sto._nino");
        assert_eq!(sanitize_location("San Mateo, Rizal"), "san_mateo_rizal");
    }

    #[test]
    fn test_keyed_values_rounds_when_asked() {
        let t = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap().and_hms_opt(3, 0, 0).unwrap();
        let series: TimeSeries = [(t, 12.34567)].into_iter().collect();

        let raw = keyed_values(&series, None);
        assert_eq!(raw.get("2024-07-01 03:00:00"), Some(&12.34567));

        let rounded = keyed_values(&series, Some(3));
        assert_eq!(rounded.get("2024-07-01 03:00:00"), Some(&12.346));
    }
}
