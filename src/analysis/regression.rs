//! Ordinary least squares with iterative outlier pruning.
//!
//! Simulated water level is regressed against observed water level. A
//! negative slope means the fit is dominated by outliers, so the samples with
//! the largest squared residuals are dropped and the line refit until the
//! slope is no longer negative.

use crate::model::ForecastError;
use crate::series::TimeSeries;

/// Samples dropped per pruning pass.
pub const OUTLIERS_PER_PASS: usize = 5;

/// Fewest samples a fit may use.
pub const MIN_SAMPLES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionFit {
    pub slope: f64,
    pub intercept: f64,
    /// Samples left after pruning.
    pub samples: usize,
    /// Pruning passes performed.
    pub passes: usize,
}

impl RegressionFit {
    pub fn apply(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

fn ols(samples: &[(f64, f64)]) -> Result<(f64, f64), ForecastError> {
    if samples.len() < MIN_SAMPLES {
        return Err(ForecastError::InsufficientData(format!(
            "{} samples, need at least {}",
            samples.len(),
            MIN_SAMPLES
        )));
    }
    let n = samples.len() as f64;
    let mean_x = samples.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (sxx, sxy) = samples.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
        let dx = x - mean_x;
        (sxx + dx * dx, sxy + dx * (y - mean_y))
    });
    if sxx == 0.0 {
        return Err(ForecastError::InsufficientData(
            "predicted values have zero variance".to_string(),
        ));
    }
    let slope = sxy / sxx;
    Ok((slope, mean_y - slope * mean_x))
}

/// Fits `y = slope·x + intercept`, pruning outliers while the slope is negative.
///
/// A pass only runs if at least `MIN_SAMPLES` samples would remain afterwards.
pub fn robust_fit(samples: &[(f64, f64)]) -> Result<RegressionFit, ForecastError> {
    let mut samples = samples.to_vec();
    let (mut slope, mut intercept) = ols(&samples)?;
    let mut passes = 0;

    while slope < 0.0 {
        if samples.len() < OUTLIERS_PER_PASS + MIN_SAMPLES {
            return Err(ForecastError::InsufficientData(format!(
                "slope still negative ({:.4}) with only {} samples left",
                slope,
                samples.len()
            )));
        }
        let residual = |(x, y): &(f64, f64)| (y - (slope * x + intercept)).powi(2);
        samples.sort_by(|a, b| residual(a).total_cmp(&residual(b)));
        samples.truncate(samples.len() - OUTLIERS_PER_PASS);
        (slope, intercept) = ols(&samples)?;
        passes += 1;
    }

    Ok(RegressionFit {
        slope,
        intercept,
        samples: samples.len(),
        passes,
    })
}

/// Regresses `predicted` on `actual` over their shared timestamps and maps
/// the whole predicted series through the fitted line.
pub fn regress_predicted(
    predicted: &TimeSeries,
    actual: &TimeSeries,
) -> Result<(RegressionFit, TimeSeries), ForecastError> {
    let samples: Vec<(f64, f64)> = predicted.aligned_pairs(actual).map(|(_, p, a)| (p, a)).collect();
    let fit = robust_fit(&samples)?;
    Ok((fit, predicted.map_values(|p| fit.apply(p))))
}
