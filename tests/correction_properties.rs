/// Invariants of the numeric corrections, checked over whole input ranges
/// rather than single examples.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

use flowcast_service::analysis::offset::{AnchorSearch, reconcile};
use flowcast_service::analysis::priority::resolve_release;
use flowcast_service::analysis::rainfall::{CUMULATIVE_WINDOWS, accumulate, window_close};
use flowcast_service::analysis::rating::{discharge_to_water_level, water_level_to_discharge};
use flowcast_service::analysis::regression::{MIN_SAMPLES, regress_predicted};
use flowcast_service::model::{
    EquationKind, OffsetScope, PREDICTED, PREDICTED_OFFSET, PriorityFallback, REGRESSED, REGRESSED_OFFSET,
    RatingCurve,
};
use flowcast_service::series::{SeriesSet, TimeSeries};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 20).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn every_10_min(n: i64, f: impl Fn(i64) -> f64) -> TimeSeries {
    (0..n).map(|k| (t0() + Duration::minutes(10 * k), f(k))).collect()
}

fn search(now: NaiveDateTime) -> AnchorSearch {
    AnchorSearch {
        now,
        step: Duration::minutes(10),
        window_start: t0(),
    }
}

// ---------------------------------------------------------------------------
// Rating curves
// ---------------------------------------------------------------------------

#[test]
fn test_rating_round_trip_for_every_equation() {
    let curves = [
        RatingCurve { a: 2.0, b: 1.0, kind: EquationKind::Linear },
        RatingCurve { a: 0.5, b: 0.3, kind: EquationKind::Exponential },
        RatingCurve { a: 3.0, b: 1.5, kind: EquationKind::Power },
        RatingCurve { a: 10.0, b: 2.0, kind: EquationKind::Logarithmic },
    ];
    for curve in curves {
        for i in 1..=100 {
            let h = 0.25 * i as f64;
            let q = water_level_to_discharge(&curve, h).unwrap();
            let back = discharge_to_water_level(&curve, q).unwrap();
            assert!(
                (back - h).abs() < 1e-6 * h.max(1.0),
                "{} curve: h={} -> q={} -> h={}",
                curve.kind,
                h,
                q,
                back
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Rainfall windows
// ---------------------------------------------------------------------------

#[test]
fn test_hourly_totals_preserve_rainfall() {
    let raw = every_10_min(6 * 30, |k| ((k * 7) % 5) as f64 * 0.5);
    let hourly = accumulate(&raw).hourly().cloned().unwrap();
    let raw_total: f64 = raw.values().sum();
    let hourly_total: f64 = hourly.values().sum();
    assert!((raw_total - hourly_total).abs() < 1e-9);
    assert!(hourly.timestamps().all(|t| t.minute() == 0 && t.second() == 0));
}

#[test]
fn test_window_closing_values_equal_sum_of_their_hours() {
    let raw = every_10_min(6 * 48, |k| ((k * 3) % 4) as f64);
    let cumulative = accumulate(&raw);
    let hourly = cumulative.hourly().unwrap();
    let first = hourly.first().unwrap().0;

    for hours in CUMULATIVE_WINDOWS.into_iter().filter(|h| *h > 1) {
        let window = cumulative.window(hours).unwrap();
        assert_eq!(window.len(), hourly.len(), "{}h window keeps every hourly key", hours);
        for (t, value) in window.iter() {
            let opened = t - Duration::hours(i64::from(hours) - 1);
            if t.hour() % hours != 0 || opened <= first {
                continue;
            }
            let expected: f64 = hourly.range(opened, t).values().sum();
            assert!(
                (value - expected).abs() < 1e-9,
                "{}h window closing at {}: {} != {}",
                hours,
                t,
                value,
                expected
            );
        }
    }
}

#[test]
fn test_window_values_hold_across_sensor_outages() {
    // Two days of rain with outages that swallow several window boundaries.
    let outages = [(20, 50), (100, 170), (215, 260)];
    let raw: TimeSeries = every_10_min(6 * 48, |k| 0.25 + (k % 3) as f64)
        .iter()
        .enumerate()
        .filter(|(k, _)| !outages.iter().any(|(from, to)| (*from..*to).contains(k)))
        .map(|(_, point)| point)
        .collect();
    let cumulative = accumulate(&raw);
    let hourly = cumulative.hourly().unwrap();

    for hours in CUMULATIVE_WINDOWS {
        let window = cumulative.window(hours).unwrap();
        for (t, value) in window.iter() {
            let close = window_close(t, hours);
            let expected = hourly.sum_between(close - Duration::hours(i64::from(hours)), t);
            assert!(
                (value - expected).abs() < 1e-9,
                "{}h window at {} (closing {}): {} != {}",
                hours,
                t,
                close,
                value,
                expected
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Regression and offsets
// ---------------------------------------------------------------------------

#[test]
fn test_regression_ends_with_non_negative_slope() {
    let predicted = every_10_min(60, |k| 2.0 + 0.05 * k as f64);
    let mut actual = predicted.map_values(|p| 0.9 * p + 0.3);
    for k in 40..50 {
        actual.insert(t0() + Duration::minutes(10 * k), -10.0);
    }

    let (fit, regressed) = regress_predicted(&predicted, &actual).unwrap();
    assert!(fit.slope >= 0.0, "slope {}", fit.slope);
    assert!(fit.samples >= MIN_SAMPLES);
    assert!(fit.passes > 0, "the outliers should have been pruned");
    assert_eq!(regressed.len(), predicted.len(), "every predicted point is mapped");
}

#[test]
fn test_offset_series_meets_actual_at_anchor() {
    let now = t0() + Duration::hours(6);
    let predicted = every_10_min(6 * 24, |k| 5.0 + (k as f64 * 0.1).sin());
    // Observations end 40 minutes before now.
    let actual = every_10_min(6 * 6 - 3, |k| 5.4 + (k as f64 * 0.1).sin() + 0.01 * k as f64);

    for scope in [OffsetScope::FullSeries, OffsetScope::FromAnchor] {
        let mut series = SeriesSet::new();
        series.insert(PREDICTED, predicted.clone());
        let offsets = reconcile(&mut series, &actual, &[(PREDICTED, PREDICTED_OFFSET)], &search(now), scope).unwrap();

        let offset = &offsets[0];
        assert_eq!(offset.anchor, actual.last().unwrap().0, "latest shared timestamp is the anchor");
        let shifted = series.get(PREDICTED_OFFSET).unwrap();
        let residual = shifted.get(offset.anchor).unwrap() - actual.get(offset.anchor).unwrap();
        assert!(residual.abs() < 1e-12, "{:?}: residual {}", scope, residual);
    }
}

#[test]
fn test_offset_scope_controls_history() {
    let now = t0() + Duration::hours(2);
    let predicted = every_10_min(24, |_| 1.0);
    let actual = every_10_min(13, |_| 1.5);

    let mut series = SeriesSet::new();
    series.insert(PREDICTED, predicted);
    reconcile(&mut series, &actual, &[(PREDICTED, PREDICTED_OFFSET)], &search(now), OffsetScope::FromAnchor).unwrap();
    let shifted = series.get(PREDICTED_OFFSET).unwrap();
    assert_eq!(shifted.get(t0()), Some(1.0), "history before the anchor is untouched");
    assert_eq!(shifted.get(now), Some(1.5));
    assert_eq!(shifted.get(now + Duration::hours(1)), Some(1.5));
}

// ---------------------------------------------------------------------------
// Release priority
// ---------------------------------------------------------------------------

#[test]
fn test_first_available_priority_wins() {
    let mut available = SeriesSet::new();
    available.insert(PREDICTED, TimeSeries::new());
    available.insert(PREDICTED_OFFSET, TimeSeries::new());
    available.insert(REGRESSED, TimeSeries::new());

    let priority = vec![REGRESSED_OFFSET.to_string(), PREDICTED_OFFSET.to_string()];
    let release = resolve_release("Sto_Nino", &priority, &available, PriorityFallback::Fail).unwrap();
    assert_eq!(release.predicted, PREDICTED_OFFSET, "missing names are skipped in order");

    available.insert(REGRESSED_OFFSET, TimeSeries::new());
    let release = resolve_release("Sto_Nino", &priority, &available, PriorityFallback::Fail).unwrap();
    assert_eq!(release.predicted, REGRESSED_OFFSET);
}
