//! Offset reconciliation between predicted and observed water level.
//!
//! Each registered (source, destination) pair gets a constant offset measured
//! at an anchor timestamp, so the destination series meets the observation
//! exactly at the anchor.

use chrono::{Duration, NaiveDateTime};

use crate::logging::{self, DataSource, FailureType, classify_failure};
use crate::model::{ForecastError, OffsetScope, SeriesOffset};
use crate::series::{SeriesSet, TimeSeries};

/// Where to start looking for an anchor and how far back to go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorSearch {
    pub now: NaiveDateTime,
    /// Step between candidates, normally the gage interval.
    pub step: Duration,
    /// Earliest timestamp the search may reach.
    pub window_start: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub time: NaiveDateTime,
    pub actual: f64,
    pub predicted: f64,
}

impl Anchor {
    pub fn offset(&self) -> f64 {
        self.actual - self.predicted
    }
}

/// Finds the anchor for `source` against `actual`.
///
/// Starts at the first source timestamp at or after `now` and steps back by
/// `step` until both series have a value, stopping at `window_start`.
pub fn find_anchor(
    source: &TimeSeries,
    actual: &TimeSeries,
    search: &AnchorSearch,
) -> Result<Anchor, ForecastError> {
    if search.step <= Duration::zero() {
        return Err(ForecastError::Config(format!(
            "anchor search step must be positive, got {}",
            search.step
        )));
    }
    let (mut t, _) = source.first_at_or_after(search.now).ok_or_else(|| {
        ForecastError::DataNotFound(format!("no predicted value at or after {}", search.now))
    })?;

    while t >= search.window_start {
        if let (Some(actual_value), Some(predicted)) = (actual.get(t), source.get(t)) {
            return Ok(Anchor {
                time: t,
                actual: actual_value,
                predicted,
            });
        }
        t -= search.step;
    }

    Err(ForecastError::DataNotFound(format!(
        "no timestamp between {} and {} with both actual and predicted values",
        search.window_start, search.now
    )))
}

/// `source` shifted by `offset` over the requested scope.
///
/// With `FromAnchor`, points before the anchor keep their original values.
pub fn apply_offset(
    source: &TimeSeries,
    offset: f64,
    scope: OffsetScope,
    anchor: NaiveDateTime,
) -> TimeSeries {
    match scope {
        OffsetScope::FullSeries => source.offset_by(offset),
        OffsetScope::FromAnchor => source
            .iter()
            .map(|(t, v)| if t >= anchor { (t, v + offset) } else { (t, v) })
            .collect(),
    }
}

/// Measures and applies the offset for every pair whose source is in `series`.
///
/// Destination series are inserted into `series`. Pairs whose source was not
/// computed this cycle are skipped, as are pairs with no anchor; the offsets
/// measured for the other pairs are still returned.
pub fn reconcile(
    series: &mut SeriesSet,
    actual: &TimeSeries,
    pairs: &[(&str, &str)],
    search: &AnchorSearch,
    scope: OffsetScope,
) -> Result<Vec<SeriesOffset>, ForecastError> {
    let mut offsets = Vec::with_capacity(pairs.len());
    for (source_name, destination) in pairs {
        let Some(source) = series.get(source_name) else {
            continue;
        };
        let anchor = match find_anchor(source, actual, search) {
            Ok(anchor) => anchor,
            Err(e) if classify_failure(&e) == FailureType::Expected => {
                logging::warn(
                    DataSource::Pipeline,
                    None,
                    &format!("no offset for '{}': {}", source_name, e),
                );
                continue;
            }
            Err(e) => return Err(e),
        };
        let value = anchor.offset();
        let shifted = apply_offset(source, value, scope, anchor.time);
        series.insert(*destination, shifted);
        offsets.push(SeriesOffset {
            source: source_name.to_string(),
            destination: destination.to_string(),
            value,
            anchor: anchor.time,
        });
    }
    Ok(offsets)
}
