//! Time series storage and alignment.
//!
//! A `TimeSeries` is an ordered map of minute-resolution timestamps to values.
//! Keys are unique and sorted; nothing fills gaps implicitly. Every transform
//! borrows its input and returns a new series.

use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::ops::Bound;

use crate::model::ForecastError;

/// Timestamp format used for JSON keys and storage requests.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Timestamp helpers
// ---------------------------------------------------------------------------

/// Rounds `t` down to the nearest multiple of `minutes` since midnight.
///
/// Seconds and sub-second parts are dropped. A zero interval only drops them.
pub fn floor_to_interval(t: NaiveDateTime, minutes: u32) -> NaiveDateTime {
    let secs = t.num_seconds_from_midnight() as i64;
    let step = (minutes.max(1) as i64) * 60;
    let midnight = t.date().and_hms_opt(0, 0, 0).unwrap_or(t);
    midnight + Duration::seconds(secs - secs % step)
}

/// The top-of-hour boundary closing the hour `t` falls in.
///
/// Exact hours map to themselves, so hour `H` covers `(H-1:00, H:00]`.
pub fn ceil_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    let floored = floor_to_interval(t, 60);
    if floored == t {
        t
    } else {
        floored + Duration::hours(1)
    }
}

pub fn format_timestamp(t: NaiveDateTime) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses `YYYY-mm-dd HH:MM:SS`, also accepting `YYYY-mm-dd HH:MM`.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, ForecastError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .map_err(|e| ForecastError::Parse(format!("bad timestamp '{}': {}", s, e)))
}

// ---------------------------------------------------------------------------
// TimeSeries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeSeries {
    points: BTreeMap<NaiveDateTime, f64>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from points in any order. Repeated timestamps are an error.
    pub fn from_points<I>(points: I) -> Result<Self, ForecastError>
    where
        I: IntoIterator<Item = (NaiveDateTime, f64)>,
    {
        let mut series = TimeSeries::new();
        for (t, v) in points {
            if series.points.insert(t, v).is_some() {
                return Err(ForecastError::DuplicateTimestamp(t));
            }
        }
        Ok(series)
    }

    /// Inserts or replaces the value at `t`.
    pub fn insert(&mut self, t: NaiveDateTime, value: f64) -> Option<f64> {
        self.points.insert(t, value)
    }

    pub fn get(&self, t: NaiveDateTime) -> Option<f64> {
        self.points.get(&t).copied()
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.points.contains_key(&t)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<(NaiveDateTime, f64)> {
        self.points.iter().next().map(|(t, v)| (*t, *v))
    }

    pub fn last(&self) -> Option<(NaiveDateTime, f64)> {
        self.points.iter().next_back().map(|(t, v)| (*t, *v))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (NaiveDateTime, f64)> + '_ {
        self.points.iter().map(|(t, v)| (*t, *v))
    }

    pub fn timestamps(&self) -> impl DoubleEndedIterator<Item = NaiveDateTime> + '_ {
        self.points.keys().copied()
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = f64> + '_ {
        self.points.values().copied()
    }

    /// Points with `start <= t <= end`.
    pub fn range(&self, start: NaiveDateTime, end: NaiveDateTime) -> TimeSeries {
        if start > end {
            return TimeSeries::new();
        }
        TimeSeries {
            points: self
                .points
                .range(start..=end)
                .map(|(t, v)| (*t, *v))
                .collect(),
        }
    }

    /// Points at or before `end`.
    pub fn until(&self, end: NaiveDateTime) -> TimeSeries {
        TimeSeries {
            points: self.points.range(..=end).map(|(t, v)| (*t, *v)).collect(),
        }
    }

    /// Earliest point with timestamp `>= t`.
    pub fn first_at_or_after(&self, t: NaiveDateTime) -> Option<(NaiveDateTime, f64)> {
        self.points.range(t..).next().map(|(t, v)| (*t, *v))
    }

    /// Sum of values with `after < t <= until`.
    pub fn sum_between(&self, after: NaiveDateTime, until: NaiveDateTime) -> f64 {
        if after >= until {
            return 0.0;
        }
        self.points
            .range((Bound::Excluded(after), Bound::Included(until)))
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.values().sum::<f64>() / self.points.len() as f64)
    }

    pub fn max_value(&self) -> Option<f64> {
        self.points.values().copied().reduce(f64::max)
    }

    pub fn min_value(&self) -> Option<f64> {
        self.points.values().copied().reduce(f64::min)
    }

    pub fn map_values<F>(&self, mut f: F) -> TimeSeries
    where
        F: FnMut(f64) -> f64,
    {
        TimeSeries {
            points: self.points.iter().map(|(t, v)| (*t, f(*v))).collect(),
        }
    }

    /// Like `map_values`, stopping at the first failing point.
    pub fn try_map_values<F>(&self, mut f: F) -> Result<TimeSeries, ForecastError>
    where
        F: FnMut(NaiveDateTime, f64) -> Result<f64, ForecastError>,
    {
        let mut points = BTreeMap::new();
        for (t, v) in &self.points {
            points.insert(*t, f(*t, *v)?);
        }
        Ok(TimeSeries { points })
    }

    /// Adds `offset` to every value.
    pub fn offset_by(&self, offset: f64) -> TimeSeries {
        self.map_values(|v| v + offset)
    }

    /// Moves every timestamp by `delta`.
    pub fn shifted(&self, delta: Duration) -> TimeSeries {
        TimeSeries {
            points: self.points.iter().map(|(t, v)| (*t + delta, *v)).collect(),
        }
    }

    /// Copies every point of `other` into `self`, overwriting shared timestamps.
    pub fn merge_overwrite(&mut self, other: &TimeSeries) {
        for (t, v) in other.iter() {
            self.points.insert(t, v);
        }
    }

    /// Drops points strictly before `t`.
    pub fn prune_before(&mut self, t: NaiveDateTime) {
        self.points = self.points.split_off(&t);
    }

    /// `(t, self[t], other[t])` for every timestamp present in both series.
    pub fn aligned_pairs<'a>(
        &'a self,
        other: &'a TimeSeries,
    ) -> impl Iterator<Item = (NaiveDateTime, f64, f64)> + 'a {
        self.points
            .iter()
            .filter_map(move |(t, a)| other.get(*t).map(|b| (*t, *a, b)))
    }
}

impl<'a> IntoIterator for &'a TimeSeries {
    type Item = (&'a NaiveDateTime, &'a f64);
    type IntoIter = btree_map::Iter<'a, NaiveDateTime, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl FromIterator<(NaiveDateTime, f64)> for TimeSeries {
    /// Later points win on repeated timestamps; use `from_points` to reject them.
    fn from_iter<I: IntoIterator<Item = (NaiveDateTime, f64)>>(iter: I) -> Self {
        TimeSeries {
            points: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// SeriesSet
// ---------------------------------------------------------------------------

/// Named series computed for one gage during one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSet {
    series: BTreeMap<String, TimeSeries>,
}

impl SeriesSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, series: TimeSeries) {
        self.series.insert(name.into(), series);
    }

    pub fn get(&self, name: &str) -> Option<&TimeSeries> {
        self.series.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.series.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TimeSeries)> {
        self.series.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
