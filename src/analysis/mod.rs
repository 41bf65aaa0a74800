/// Numeric transforms applied to observed and simulated series.
///
/// Everything here is pure: series in, series or values out. External tools
/// are reached only through traits from `engine`.
///
/// Submodules:
/// - `rainfall`:   hourly bucketing and cumulative windows.
/// - `rating`:     stage-discharge conversions.
/// - `regression`: OLS with outlier pruning.
/// - `baseflow`:   baseflow detection and rainfall scenario templates.
/// - `tidal`:      de-meaned tide correction.
/// - `offset`:     anchor search and offset reconciliation.
/// - `priority`:   release role selection.
/// - `simplify`:   polyline simplification for extent outlines.
pub mod baseflow;
pub mod offset;
pub mod priority;
pub mod rainfall;
pub mod rating;
pub mod regression;
pub mod simplify;
pub mod tidal;
