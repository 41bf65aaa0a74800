/// Sensor repository client.
///
/// Fetches rainfall and water-level telemetry for a device over a date
/// range. The repository answers with one JSON object per reading:
///
/// ```json
/// {"data": [{"dateTimeRead": "2024-05-01 12:34:56+08", "rain_value": "0.5"}]}
/// ```
///
/// Readings are rounded down to the 10-minute grid, filtered to the
/// requested range, and water-level channels are converted from cm to m.

use chrono::{NaiveDateTime, Timelike};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::RepositoryConfig;
use crate::logging::{self, DataSource};
use crate::model::ForecastError;
use crate::series::{TimeSeries, floor_to_interval};

pub const SAMPLE_INTERVAL_MINUTES: u32 = 10;

pub const RAINFALL_CHANNEL: &str = "rain_value";
pub const WATER_LEVEL_MSL_CHANNEL: &str = "waterlevel_msl";
pub const WATER_LEVEL_CHANNEL: &str = "waterlevel";

const TIMESTAMP_FIELD: &str = "dateTimeRead";

/// Channel name to series for one device.
pub type SensorData = BTreeMap<String, TimeSeries>;

// ============================================================================
// Repository response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RepositoryResponse {
    #[serde(default)]
    pub data: Vec<BTreeMap<String, Value>>,
}

fn parse_reading_time(raw: &str) -> Result<NaiveDateTime, ForecastError> {
    // Local time with a trailing "+08"-style offset that we drop.
    let local = raw.get(..19).unwrap_or(raw);
    NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| ForecastError::Parse(format!("bad {} '{}': {}", TIMESTAMP_FIELD, raw, e)))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Converts a repository payload into per-channel series.
///
/// Non-numeric values are skipped. When two readings round to the same
/// slot the later one wins.
pub fn parse_repository_response(
    body: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<SensorData, ForecastError> {
    let response: RepositoryResponse = serde_json::from_str(body)?;
    let mut data = SensorData::new();

    for reading in response.data {
        let Some(raw_time) = reading.get(TIMESTAMP_FIELD).and_then(Value::as_str) else {
            continue;
        };
        let t = floor_to_interval(parse_reading_time(raw_time)?, SAMPLE_INTERVAL_MINUTES);
        if t < start || t > end {
            continue;
        }
        for (channel, value) in &reading {
            if channel == TIMESTAMP_FIELD {
                continue;
            }
            let Some(mut v) = numeric(value) else {
                continue;
            };
            if channel.contains(WATER_LEVEL_CHANNEL) {
                v /= 100.0;
            }
            data.entry(channel.clone()).or_default().insert(t, v);
        }
    }
    Ok(data)
}

// ============================================================================
// Source trait and HTTP implementation
// ============================================================================

pub trait SensorSource {
    fn fetch(&self, device_id: &str, start: NaiveDateTime, end: NaiveDateTime) -> Result<SensorData, ForecastError>;
}

pub struct RepositoryClient {
    client: reqwest::blocking::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    retries: u32,
    retry_interval: Duration,
}

impl RepositoryClient {
    /// Builds the client. Credentials come from the environment variables
    /// named in the config; both must be set for basic auth to be used.
    pub fn new(config: &RepositoryConfig) -> Result<Self, ForecastError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
        }
        let credentials = match (std::env::var(&config.user_var), std::env::var(&config.password_var)) {
            (Ok(user), Ok(pass)) => Some((user, pass)),
            _ => {
                logging::warn(
                    DataSource::Sensor,
                    None,
                    &format!("{} / {} not set, querying without credentials", config.user_var, config.password_var),
                );
                None
            }
        };
        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            retries: config.retries,
            retry_interval: Duration::from_secs(config.retry_interval_secs),
        })
    }

    pub fn device_url(&self, device_id: &str, start: NaiveDateTime, end: NaiveDateTime) -> String {
        format!(
            "{}/{}/from/{}/to/{}",
            self.base_url,
            device_id,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )
    }

    fn get(&self, url: &str) -> Result<String, ForecastError> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request.send()?;
        if !response.status().is_success() {
            return Err(ForecastError::Http(format!("{} returned {}", url, response.status())));
        }
        Ok(response.text()?)
    }
}

impl SensorSource for RepositoryClient {
    fn fetch(&self, device_id: &str, start: NaiveDateTime, end: NaiveDateTime) -> Result<SensorData, ForecastError> {
        // The repository works in whole days; the end day must be included.
        let url = self.device_url(device_id, start, end + chrono::Duration::days(1));
        let mut attempt = 0;
        loop {
            match self.get(&url) {
                Ok(body) => return parse_repository_response(&body, start, end),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    logging::warn(
                        DataSource::Sensor,
                        Some(device_id),
                        &format!("attempt {} failed ({}), retrying", attempt, e),
                    );
                    std::thread::sleep(self.retry_interval);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Rainfall for a device. A device without the rainfall channel is `DataNotFound`.
pub fn fetch_rainfall(
    source: &dyn SensorSource,
    device_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<TimeSeries, ForecastError> {
    let mut data = source.fetch(device_id, start, end)?;
    data.remove(RAINFALL_CHANNEL)
        .ok_or_else(|| ForecastError::DataNotFound(format!("device {} has no {} channel", device_id, RAINFALL_CHANNEL)))
}

/// Water level in metres above datum, shifted by the gage's `datum_offset`.
///
/// Prefers the mean-sea-level channel and falls back to the raw one.
pub fn fetch_water_level(
    source: &dyn SensorSource,
    device_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    datum_offset: f64,
) -> Result<TimeSeries, ForecastError> {
    let mut data = source.fetch(device_id, start, end)?;
    let series = data
        .remove(WATER_LEVEL_MSL_CHANNEL)
        .filter(|s| !s.is_empty())
        .or_else(|| data.remove(WATER_LEVEL_CHANNEL))
        .ok_or_else(|| ForecastError::DataNotFound(format!("device {} has no water level channel", device_id)))?;
    Ok(series.offset_by(datum_offset))
}

/// Whether a timestamp sits on the sampling grid.
pub fn on_sample_grid(t: NaiveDateTime) -> bool {
    t.second() == 0 && t.minute() % SAMPLE_INTERVAL_MINUTES == 0
}
