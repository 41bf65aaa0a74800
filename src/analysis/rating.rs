//! Stage-discharge conversions.
//!
//! `discharge_to_water_level` is the exact inverse of
//! `water_level_to_discharge` for every equation kind.

use crate::model::{EquationKind, ForecastError, RatingCurve};
use crate::series::TimeSeries;

/// Stand-in for zero discharge on exponential curves, where ln(0) is undefined.
pub const ZERO_DISCHARGE_EPSILON: f64 = 1e-9;

fn finite(value: f64, what: &str, input: f64, curve: &RatingCurve) -> Result<f64, ForecastError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ForecastError::Domain(format!(
            "{} of {} is not finite on {} curve (a={}, b={})",
            what, input, curve.kind, curve.a, curve.b
        )))
    }
}

fn domain(msg: String) -> ForecastError {
    ForecastError::Domain(msg)
}

fn at_time(t: chrono::NaiveDateTime, err: ForecastError) -> ForecastError {
    match err {
        ForecastError::Domain(msg) => domain(format!("at {}: {}", t, msg)),
        other => other,
    }
}

/// Water level in metres for discharge `q`.
pub fn discharge_to_water_level(curve: &RatingCurve, q: f64) -> Result<f64, ForecastError> {
    let RatingCurve { a, b, kind } = *curve;
    if a == 0.0 {
        return Err(domain(format!("{} curve has a zero 'a' coefficient", kind)));
    }
    let h = match kind {
        EquationKind::Linear => (q - b) / a,
        EquationKind::Exponential => {
            if b == 0.0 {
                return Err(domain("EXPONENTIAL curve has a zero 'b' coefficient".into()));
            }
            let q = if q == 0.0 { ZERO_DISCHARGE_EPSILON } else { q };
            let ratio = q / a;
            if ratio <= 0.0 {
                return Err(domain(format!("ln({}) is undefined (q={}, a={})", ratio, q, a)));
            }
            ratio.ln() / b
        }
        EquationKind::Power => {
            if b == 0.0 {
                return Err(domain("POWER curve has a zero 'b' coefficient".into()));
            }
            let ratio = q / a;
            if ratio < 0.0 {
                return Err(domain(format!("negative ratio {} on POWER curve", ratio)));
            }
            ratio.powf(1.0 / b)
        }
        EquationKind::Logarithmic => ((q + b) / a).exp(),
    };
    finite(h, "water level", q, curve)
}

/// Discharge for water level `h` in metres.
pub fn water_level_to_discharge(curve: &RatingCurve, h: f64) -> Result<f64, ForecastError> {
    let RatingCurve { a, b, kind } = *curve;
    let q = match kind {
        EquationKind::Linear => a * h + b,
        EquationKind::Exponential => a * (b * h).exp(),
        EquationKind::Power => {
            if h < 0.0 {
                return Err(domain(format!("negative water level {} on POWER curve", h)));
            }
            a * h.powf(b)
        }
        EquationKind::Logarithmic => {
            if h <= 0.0 {
                return Err(domain(format!("ln({}) is undefined on LOGARITHMIC curve", h)));
            }
            a * h.ln() - b
        }
    };
    finite(q, "discharge", h, curve)
}

/// Converts a whole discharge series, failing on the first out-of-domain sample.
pub fn discharge_series_to_water_level(
    curve: &RatingCurve,
    discharge: &TimeSeries,
) -> Result<TimeSeries, ForecastError> {
    discharge.try_map_values(|t, q| {
        discharge_to_water_level(curve, q).map_err(|e| at_time(t, e))
    })
}

pub fn water_level_series_to_discharge(
    curve: &RatingCurve,
    water_level: &TimeSeries,
) -> Result<TimeSeries, ForecastError> {
    water_level.try_map_values(|t, h| {
        water_level_to_discharge(curve, h).map_err(|e| at_time(t, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(kind: EquationKind, a: f64, b: f64) -> RatingCurve {
        RatingCurve { a, b, kind }
    }

    fn assert_close(a: f64, b: f64, what: &str) {
        let tol = 1e-9 * a.abs().max(b.abs()).max(1.0);
        assert!((a - b).abs() <= tol, "{}: {} vs {}", what, a, b);
    }

    #[test]
    fn test_round_trip_for_every_equation_kind() {
        let curves = [
            curve(EquationKind::Linear, 12.5, -3.0),
            curve(EquationKind::Exponential, 0.8, 1.3),
            curve(EquationKind::Power, 25.0, 1.6),
            curve(EquationKind::Logarithmic, 40.0, 5.0),
        ];
        for c in &curves {
            for q in [0.5, 3.0, 17.25, 120.0, 950.0] {
                let h = discharge_to_water_level(c, q).unwrap();
                let back = water_level_to_discharge(c, h).unwrap();
                assert_close(back, q, &format!("{} round trip", c.kind));
            }
        }
    }

    #[test]
    fn test_linear_conversion_values() {
        let c = curve(EquationKind::Linear, 2.0, 1.0);
        assert_eq!(water_level_to_discharge(&c, 3.0).unwrap(), 7.0);
        assert_eq!(discharge_to_water_level(&c, 7.0).unwrap(), 3.0);
    }

    #[test]
    fn test_exponential_zero_discharge_uses_epsilon() {
        let c = curve(EquationKind::Exponential, 1.0, 2.0);
        let h = discharge_to_water_level(&c, 0.0).unwrap();
        assert_close(h, ZERO_DISCHARGE_EPSILON.ln() / 2.0, "epsilon level");
    }

    #[test]
    fn test_negative_discharge_on_exponential_is_domain_error() {
        let c = curve(EquationKind::Exponential, 1.0, 2.0);
        let err = discharge_to_water_level(&c, -4.0).unwrap_err();
        assert!(matches!(err, ForecastError::Domain(_)), "got {:?}", err);
    }

    #[test]
    fn test_zero_coefficient_is_domain_error() {
        let c = curve(EquationKind::Linear, 0.0, 1.0);
        assert!(matches!(
            discharge_to_water_level(&c, 5.0),
            Err(ForecastError::Domain(_))
        ));
    }

    #[test]
    fn test_logarithmic_rejects_non_positive_level() {
        let c = curve(EquationKind::Logarithmic, 10.0, 1.0);
        assert!(matches!(
            water_level_to_discharge(&c, 0.0),
            Err(ForecastError::Domain(_))
        ));
    }

    #[test]
    fn test_series_conversion_reports_failing_timestamp() {
        use chrono::NaiveDate;
        let t = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        let discharge: TimeSeries = [(t, -1.0)].into_iter().collect();
        let c = curve(EquationKind::Power, 2.0, 0.5);
        let err = discharge_series_to_water_level(&c, &discharge).unwrap_err();
        assert!(err.to_string().contains("2024-01-01 06:00:00"), "{}", err);
    }
}
