//! Rolling cache of published forecasts.
//!
//! Each cycle appends the value it publishes for one hour ahead, so over time
//! the cache shows what the service predicted for every hour of the last week.
//! Charts draw it as `Old Predicted` next to the observation.

use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::forecast::{keyed_values, sanitize_location, write_json};
use crate::model::ForecastError;
use crate::series::{TimeSeries, parse_timestamp};

/// Hours ahead of `now` the cached value is taken from.
pub const PUBLISH_LEAD_HOURS: i64 = 1;

pub struct ForecastCache {
    dir: PathBuf,
}

impl ForecastCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, location: &str) -> PathBuf {
        self.dir.join(format!("{}_predicted.json", sanitize_location(location)))
    }

    /// Cached forecast for `location`; empty when nothing was published yet.
    pub fn load(&self, location: &str) -> Result<TimeSeries, ForecastError> {
        let path = self.path_for(location);
        if !path.exists() {
            return Ok(TimeSeries::new());
        }
        read_cache(&path)
    }

    pub fn store(&self, location: &str, cached: &TimeSeries) -> Result<PathBuf, ForecastError> {
        let path = self.path_for(location);
        write_json(&path, &keyed_values(cached, None))?;
        Ok(path)
    }
}

fn read_cache(path: &Path) -> Result<TimeSeries, ForecastError> {
    let text = fs::read_to_string(path)?;
    let raw: BTreeMap<String, f64> = serde_json::from_str(&text)?;
    raw.iter()
        .map(|(k, v)| parse_timestamp(k).map(|t| (t, *v)))
        .collect::<Result<Vec<_>, _>>()
        .map(|points| points.into_iter().collect())
}

/// The cache after this cycle's publication.
///
/// The published value at `now + 1h` is added (replacing any earlier value
/// for that hour) and entries older than `keep_from` are dropped. If the
/// published series does not reach `now + 1h` the cache is only pruned.
pub fn publish_point(
    cached: &TimeSeries,
    published: &TimeSeries,
    now: NaiveDateTime,
    keep_from: NaiveDateTime,
) -> TimeSeries {
    let mut next = cached.clone();
    let at = now + Duration::hours(PUBLISH_LEAD_HOURS);
    if let Some(v) = published.get(at) {
        next.insert(at, v);
    }
    next.prune_before(keep_from);
    next
}
