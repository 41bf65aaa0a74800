//! Hourly bucketing and calendar-aligned cumulative rainfall.
//!
//! Sensor rainfall arrives as sub-hourly increments. Each increment belongs to
//! the clock hour `(H:00, H+1:00]` and the bucket is keyed by `H+1:00`. The
//! cumulative windows then run over the hourly series and reset at calendar
//! hours that are multiples of the window length (hour 0 closes every window).

use chrono::{Duration, NaiveDateTime, Timelike};
use std::collections::BTreeMap;

use crate::series::{TimeSeries, ceil_to_hour};

/// Window lengths, in hours, reported for every precipitation gage.
pub const CUMULATIVE_WINDOWS: [u32; 5] = [1, 3, 6, 12, 24];

/// Cumulative rainfall for one gage, keyed by window length in hours.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CumulativeRainfall {
    windows: BTreeMap<u32, TimeSeries>,
}

impl CumulativeRainfall {
    pub fn window(&self, hours: u32) -> Option<&TimeSeries> {
        self.windows.get(&hours)
    }

    pub fn hourly(&self) -> Option<&TimeSeries> {
        self.window(1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &TimeSeries)> {
        self.windows.iter().map(|(h, s)| (*h, s))
    }
}

/// Sums sub-hourly rainfall into hourly totals.
///
/// The trailing partial hour is emitted with whatever it accumulated.
pub fn hourly_totals(rainfall: &TimeSeries) -> TimeSeries {
    let mut hourly = TimeSeries::new();
    let mut current: Option<(NaiveDateTime, f64)> = None;

    for (t, v) in rainfall.iter() {
        let key = ceil_to_hour(t);
        current = match current {
            Some((open, total)) if open == key => Some((open, total + v)),
            Some((open, total)) => {
                hourly.insert(open, total);
                Some((key, v))
            }
            None => Some((key, v)),
        };
    }
    if let Some((open, total)) = current {
        hourly.insert(open, total);
    }
    hourly
}

/// Calendar hour closing the `window_hours` window that `t` falls in.
///
/// Windows are `(close - window_hours, close]` with `close` on an hour that is
/// a multiple of `window_hours` since midnight.
pub fn window_close(t: NaiveDateTime, window_hours: u32) -> NaiveDateTime {
    let window = window_hours.max(1);
    let hour = ceil_to_hour(t);
    match hour.hour() % window {
        0 => hour,
        rem => hour + Duration::hours(i64::from(window - rem)),
    }
}

/// Running sums over an hourly series for a calendar-aligned window.
///
/// Each hourly key carries the sum of the window it falls in, up to and
/// including itself. The sum restarts whenever a key belongs to a different
/// window than the one before it, so gaps spanning a boundary do not carry
/// rain across.
pub fn cumulative_window(hourly: &TimeSeries, window_hours: u32) -> TimeSeries {
    let mut open: Option<NaiveDateTime> = None;
    let mut running = 0.0;
    let mut out = TimeSeries::new();
    for (t, v) in hourly.iter() {
        let close = window_close(t, window_hours);
        if open != Some(close) {
            open = Some(close);
            running = 0.0;
        }
        running += v;
        out.insert(t, running);
    }
    out
}

/// Buckets raw rainfall and computes every window in `CUMULATIVE_WINDOWS`.
pub fn accumulate(rainfall: &TimeSeries) -> CumulativeRainfall {
    let hourly = hourly_totals(rainfall);
    let mut windows = BTreeMap::new();
    for hours in CUMULATIVE_WINDOWS {
        let series = if hours == 1 {
            hourly.clone()
        } else {
            cumulative_window(&hourly, hours)
        };
        windows.insert(hours, series);
    }
    CumulativeRainfall { windows }
}
