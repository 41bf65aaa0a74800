//! Chooses which computed series is published as the forecast.

use crate::logging::{self, DataSource};
use crate::model::{
    ACTUAL, ForecastError, OLD_PREDICTED, PREDICTED, PriorityFallback, ReleaseTranslation,
};
use crate::series::SeriesSet;

/// Maps the first available name in `priority` to the `Predicted` role.
///
/// Observed water level is always `Actual` and the cached forecast is always
/// `Old Predicted`. When nothing in `priority` was computed, `fallback`
/// decides between the plain simulated series and an error.
pub fn resolve_release(
    gage_id: &str,
    priority: &[String],
    available: &SeriesSet,
    fallback: PriorityFallback,
) -> Result<ReleaseTranslation, ForecastError> {
    let chosen = priority.iter().find(|name| available.contains(name));

    let predicted = match (chosen, fallback) {
        (Some(name), _) => name.clone(),
        (None, PriorityFallback::BaseSeries) => {
            logging::warn(
                DataSource::Pipeline,
                Some(gage_id),
                &format!(
                    "none of {:?} computed, publishing '{}'",
                    priority, PREDICTED
                ),
            );
            PREDICTED.to_string()
        }
        (None, PriorityFallback::Fail) => {
            return Err(ForecastError::PriorityMismatch {
                gage: gage_id.to_string(),
                wanted: priority.to_vec(),
            });
        }
    };

    Ok(ReleaseTranslation {
        actual: ACTUAL.to_string(),
        predicted,
        old_predicted: OLD_PREDICTED.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PREDICTED_OFFSET, REGRESSED_OFFSET, SeriesRole};
    use crate::series::TimeSeries;

    fn available(names: &[&str]) -> SeriesSet {
        let mut set = SeriesSet::new();
        for name in names {
            set.insert(*name, TimeSeries::new());
        }
        set
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_available_priority_wins() {
        let priority = names(&["SeriesB", "SeriesA"]);
        let release = resolve_release("G1", &priority, &available(&["SeriesA"]), PriorityFallback::Fail).unwrap();
        assert_eq!(release.predicted, "SeriesA");
        assert_eq!(release.role_of("SeriesA"), Some(SeriesRole::Predicted));
    }

    #[test]
    fn test_order_of_priority_list_is_respected() {
        let priority = names(&[REGRESSED_OFFSET, PREDICTED_OFFSET]);
        let set = available(&[PREDICTED, PREDICTED_OFFSET, REGRESSED_OFFSET]);
        let release = resolve_release("G1", &priority, &set, PriorityFallback::BaseSeries).unwrap();
        assert_eq!(release.predicted, REGRESSED_OFFSET);
        assert_eq!(release.actual, ACTUAL);
        assert_eq!(release.old_predicted, OLD_PREDICTED);
    }

    #[test]
    fn test_base_series_fallback() {
        let priority = names(&[REGRESSED_OFFSET]);
        let release =
            resolve_release("G1", &priority, &available(&[PREDICTED]), PriorityFallback::BaseSeries).unwrap();
        assert_eq!(release.predicted, PREDICTED);
    }

    #[test]
    fn test_fail_fallback_reports_wanted_series() {
        let priority = names(&[REGRESSED_OFFSET]);
        let err = resolve_release("G7", &priority, &available(&[PREDICTED]), PriorityFallback::Fail).unwrap_err();
        match err {
            ForecastError::PriorityMismatch { gage, wanted } => {
                assert_eq!(gage, "G7");
                assert_eq!(wanted, priority);
            }
            other => panic!("expected PriorityMismatch, got {:?}", other),
        }
    }
}
