//! Tidal correction of simulated water level.
//!
//! Gages near the coast see a tidal signal the hydrologic model cannot
//! produce. A harmonic prediction is fitted to observed water level and its
//! de-meaned form is added to the simulated series.

use chrono::NaiveDateTime;

use crate::engine::tide::TideUtility;
use crate::model::ForecastError;
use crate::series::TimeSeries;

#[derive(Debug, Clone, PartialEq)]
pub struct TideCorrection {
    /// Raw tide prediction.
    pub tide: TimeSeries,
    /// Mean of the whole prediction.
    pub average: f64,
    /// `predicted + tide - average` on shared timestamps.
    pub corrected: TimeSeries,
}

/// Time span and step handed to the tide utility.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TideSpan {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub interval_minutes: u32,
}

pub fn apply_tidal_correction(
    predicted: &TimeSeries,
    tide: &TimeSeries,
) -> Result<TideCorrection, ForecastError> {
    let average = tide
        .mean()
        .ok_or_else(|| ForecastError::DataNotFound("tide prediction is empty".to_string()))?;
    let corrected = predicted
        .aligned_pairs(tide)
        .map(|(t, p, tide_value)| (t, p + tide_value - average))
        .collect();
    Ok(TideCorrection {
        tide: tide.clone(),
        average,
        corrected,
    })
}

/// Runs the tide utility on observed water level up to `now` and corrects
/// `predicted` with the result.
pub fn correct_for_tide(
    utility: &dyn TideUtility,
    observed: &TimeSeries,
    predicted: &TimeSeries,
    now: NaiveDateTime,
    span: &TideSpan,
) -> Result<TideCorrection, ForecastError> {
    let history = observed.until(now);
    if history.is_empty() {
        return Err(ForecastError::DataNotFound(format!(
            "no observed water level before {} for tide analysis",
            now
        )));
    }
    let tide = utility.predict(&history, span)?;
    apply_tidal_correction(predicted, &tide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use std::cell::RefCell;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 10, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn at(i: i64) -> NaiveDateTime {
        t0() + Duration::hours(i)
    }

    struct FixedTide {
        output: TimeSeries,
        seen: RefCell<Option<TimeSeries>>,
    }

    impl TideUtility for FixedTide {
        fn predict(&self, observed: &TimeSeries, _span: &TideSpan) -> Result<TimeSeries, ForecastError> {
            *self.seen.borrow_mut() = Some(observed.clone());
            Ok(self.output.clone())
        }
    }

    struct BrokenTide;

    impl TideUtility for BrokenTide {
        fn predict(&self, _observed: &TimeSeries, _span: &TideSpan) -> Result<TimeSeries, ForecastError> {
            Err(ForecastError::ExternalTool {
                tool: "tide analysis".to_string(),
                detail: "exit status: 1".to_string(),
            })
        }
    }

    fn span() -> TideSpan {
        TideSpan {
            start: at(0),
            end: at(10),
            interval_minutes: 60,
        }
    }

    #[test]
    fn test_correction_adds_demeaned_tide_on_shared_timestamps() {
        let predicted: TimeSeries = (0..4).map(|i| (at(i), 2.0)).collect();
        let tide: TimeSeries = [(at(1), 0.5), (at(2), -0.5), (at(3), 0.3), (at(9), 0.3)]
            .into_iter()
            .collect();
        let result = apply_tidal_correction(&predicted, &tide).unwrap();
        assert!((result.average - 0.15).abs() < 1e-12);
        assert_eq!(result.corrected.len(), 3, "only shared timestamps are corrected");
        assert!((result.corrected.get(at(1)).unwrap() - 2.35).abs() < 1e-12);
        assert!(result.corrected.get(at(0)).is_none());
    }

    #[test]
    fn test_empty_tide_is_data_not_found() {
        let predicted: TimeSeries = [(at(0), 1.0)].into_iter().collect();
        let err = apply_tidal_correction(&predicted, &TimeSeries::new()).unwrap_err();
        assert!(matches!(err, ForecastError::DataNotFound(_)));
    }

    #[test]
    fn test_only_history_up_to_now_is_analysed() {
        let observed: TimeSeries = (0..6).map(|i| (at(i), 1.0)).collect();
        let predicted: TimeSeries = (0..6).map(|i| (at(i), 1.0)).collect();
        let utility = FixedTide {
            output: (0..6).map(|i| (at(i), 0.0)).collect(),
            seen: RefCell::new(None),
        };
        correct_for_tide(&utility, &observed, &predicted, at(3), &span()).unwrap();
        let seen = utility.seen.borrow().clone().unwrap();
        assert_eq!(seen.last().map(|(t, _)| t), Some(at(3)));
    }

    #[test]
    fn test_tool_failure_propagates() {
        let observed: TimeSeries = [(at(0), 1.0)].into_iter().collect();
        let err = correct_for_tide(&BrokenTide, &observed, &observed, at(1), &span()).unwrap_err();
        assert!(matches!(err, ForecastError::ExternalTool { .. }), "got {:?}", err);
    }

    #[test]
    fn test_no_history_is_data_not_found() {
        let observed: TimeSeries = [(at(5), 1.0)].into_iter().collect();
        let err = correct_for_tide(&BrokenTide, &observed, &observed, at(1), &span()).unwrap_err();
        assert!(matches!(err, ForecastError::DataNotFound(_)));
    }
}
