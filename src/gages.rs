/// Gage registry for the forecast service.
///
/// Precipitation gages feed the simulation; discharge gages receive a
/// corrected forecast each cycle. The registry is built once from the
/// configuration and is the single place other modules look gages up.

use std::collections::HashSet;

use crate::config::{Config, DischargeGageConfig, PrecipGageConfig};
use crate::model::{ForecastError, RatingCurve};

// ---------------------------------------------------------------------------
// Gage metadata
// ---------------------------------------------------------------------------

/// A rain gage whose readings drive the hydrologic model.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecipGage {
    /// Name used in the model's gage registration file.
    pub id: String,
    /// Repository device identifier.
    pub device_id: String,
    pub location: String,
    pub province: String,
}

/// A river gage that gets a published forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct DischargeGage {
    /// Model junction name; simulated flow is stored under it.
    pub id: String,
    pub device_id: String,
    pub location: String,
    pub province: String,
    /// Minutes between samples, shared with the cycle interval.
    pub interval_minutes: u32,
    pub rating: RatingCurve,
    /// Metres added to every water-level reading.
    pub water_level_offset: f64,
    pub tidal_correction: bool,
    /// Series names in order of preference for publication.
    pub priority: Vec<String>,
    pub chart_min: Option<f64>,
    pub chart_max: Option<f64>,
}

impl PrecipGage {
    fn from_config(c: &PrecipGageConfig) -> Self {
        Self {
            id: c.id.clone(),
            device_id: c.device_id.clone(),
            location: c.location.clone(),
            province: c.province.clone(),
        }
    }
}

impl DischargeGage {
    fn from_config(c: &DischargeGageConfig, interval_minutes: u32) -> Self {
        Self {
            id: c.id.clone(),
            device_id: c.device_id.clone(),
            location: c.location.clone(),
            province: c.province.clone(),
            interval_minutes,
            rating: c.rating,
            water_level_offset: c.water_level_offset,
            tidal_correction: c.tidal_correction,
            priority: c.priority.clone(),
            chart_min: c.chart_min,
            chart_max: c.chart_max,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct GageRegistry {
    precip: Vec<PrecipGage>,
    discharge: Vec<DischargeGage>,
}

impl GageRegistry {
    /// Builds the registry, rejecting ids used twice within a gage kind.
    pub fn from_config(config: &Config) -> Result<Self, ForecastError> {
        let precip: Vec<PrecipGage> = config.precip_gages.iter().map(PrecipGage::from_config).collect();
        let discharge: Vec<DischargeGage> = config
            .discharge_gages
            .iter()
            .map(|g| DischargeGage::from_config(g, config.general.interval_minutes))
            .collect();

        ensure_unique("precipitation", precip.iter().map(|g| g.id.as_str()))?;
        ensure_unique("discharge", discharge.iter().map(|g| g.id.as_str()))?;

        Ok(Self { precip, discharge })
    }

    pub fn precip_gages(&self) -> &[PrecipGage] {
        &self.precip
    }

    pub fn discharge_gages(&self) -> &[DischargeGage] {
        &self.discharge
    }

    pub fn find_precip(&self, id: &str) -> Option<&PrecipGage> {
        self.precip.iter().find(|g| g.id == id)
    }

    pub fn find_discharge(&self, id: &str) -> Option<&DischargeGage> {
        self.discharge.iter().find(|g| g.id == id)
    }

    /// The first configured discharge gage. Its rating curve converts the
    /// scenario templates and its baseflow aligns them.
    pub fn primary_discharge(&self) -> Option<&DischargeGage> {
        self.discharge.first()
    }
}

fn ensure_unique<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ForecastError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ForecastError::Config(format!("duplicate {} gage id '{}'", kind, id)));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
