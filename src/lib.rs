//! Flood forecast service.
//!
//! Module tree:
//! - `model`:    series names, rating curves, release roles, `ForecastError`
//! - `series`:   the `TimeSeries` container and timestamp helpers
//! - `config`:   TOML configuration
//! - `gages`:    precipitation and discharge gage registry
//! - `logging`:  `tracing` setup and failure classification
//! - `ingest`:   sensor repository client
//! - `engine`:   simulation, time-series store and tide utility collaborators
//! - `analysis`: the numeric corrections
//! - `forecast`: forecast JSON, cache, chart bundle and discharge export
//! - `pipeline`: one forecast cycle
//! - `schedule`: live and replay control loop
//! - `verify`:   preflight checks

pub mod analysis;
pub mod config;
pub mod engine;
pub mod forecast;
pub mod gages;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod schedule;
pub mod series;
pub mod verify;
