/// Control loop scheduling.
///
/// Live runs follow the wall clock: each cycle starts on an interval
/// boundary and the loop sleeps until the next one. Replay runs step through
/// a configured historical window as fast as the cycles complete, which is
/// how past events are re-forecast for testing and development.

use chrono::{Duration, Local, NaiveDateTime};

use crate::config::GeneralConfig;
use crate::logging::{self, DataSource};
use crate::model::ForecastError;
use crate::pipeline::CycleReport;
use crate::series::floor_to_interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    Replay { start: NaiveDateTime, end: NaiveDateTime },
}

impl RunMode {
    pub fn from_config(general: &GeneralConfig) -> Result<Self, ForecastError> {
        if !general.replay {
            return Ok(RunMode::Live);
        }
        match (general.start_time, general.end_time) {
            (Some(start), Some(end)) => Ok(RunMode::Replay { start, end }),
            _ => Err(ForecastError::Config("replay needs both start_time and end_time".to_string())),
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, RunMode::Replay { .. })
    }
}

/// Source of the current time, and a way to wait for a later one.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
    fn sleep_until(&self, t: NaiveDateTime);
}

/// Local wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn sleep_until(&self, t: NaiveDateTime) {
        if let Ok(wait) = (t - self.now()).to_std() {
            std::thread::sleep(wait);
        }
    }
}

/// Start of the cycle following one that started at `cycle_start`.
pub fn next_cycle_time(cycle_start: NaiveDateTime, interval_minutes: u32) -> NaiveDateTime {
    floor_to_interval(cycle_start, interval_minutes) + Duration::minutes(i64::from(interval_minutes))
}

fn log_cycle_error(now: NaiveDateTime, err: &ForecastError) {
    logging::error(
        DataSource::System,
        None,
        &format!("cycle {} failed, retrying next interval: {}", now, err),
    );
}

/// Runs cycles until the replay window is exhausted, or forever when live.
///
/// A failed cycle is logged and the loop moves on to the next interval. With
/// `run_once` only one cycle runs and its error, if any, is returned.
/// Returns the number of cycles run.
pub fn run_loop<F>(
    mode: RunMode,
    interval_minutes: u32,
    run_once: bool,
    clock: &dyn Clock,
    mut cycle: F,
) -> Result<usize, ForecastError>
where
    F: FnMut(NaiveDateTime) -> Result<CycleReport, ForecastError>,
{
    if interval_minutes == 0 {
        return Err(ForecastError::Config("interval must be positive".to_string()));
    }
    let mut cycles = 0;

    match mode {
        RunMode::Replay { start, end } => {
            logging::info(DataSource::System, None, &format!("Replaying {} -> {}", start, end));
            let mut now = floor_to_interval(start, interval_minutes);
            while now <= end {
                let result = cycle(now);
                cycles += 1;
                if run_once {
                    return result.map(|_| cycles);
                }
                if let Err(e) = result {
                    log_cycle_error(now, &e);
                }
                now = next_cycle_time(now, interval_minutes);
            }
            Ok(cycles)
        }
        RunMode::Live => loop {
            let now = floor_to_interval(clock.now(), interval_minutes);
            let result = cycle(now);
            cycles += 1;
            if run_once {
                return result.map(|_| cycles);
            }
            if let Err(e) = result {
                log_cycle_error(now, &e);
            }
            let next = next_cycle_time(now, interval_minutes);
            logging::debug(DataSource::System, None, &format!("sleeping until {}", next));
            clock.sleep_until(next);
        },
    }
}
