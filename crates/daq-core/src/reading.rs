//! Readings, elapsed-time clock and the warning log.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Value written in place of a dose rate that could not be read, for
/// consumers that expect a plain `[elapsed, dose_rate]` float pair.
pub const DOSE_RATE_SENTINEL: f64 = -1.0;

/// Unit a meter reports its dose rate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoseRateUnit {
    /// Microsieverts per hour
    MicroSievertPerHour,
    /// Nanosieverts per hour
    NanoSievertPerHour,
}

impl DoseRateUnit {
    /// Unit symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::MicroSievertPerHour => "µSv/h",
            Self::NanoSievertPerHour => "nSv/h",
        }
    }
}

impl fmt::Display for DoseRateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One poll result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Seconds since the caller's time offset.
    pub elapsed_s: f64,
    /// Dose rate, or `None` when the read failed.
    pub dose_rate: Option<f64>,
    /// Unit of `dose_rate`.
    pub unit: DoseRateUnit,
}

impl Reading {
    /// `[elapsed_s, dose_rate]`, with a failed read as [`DOSE_RATE_SENTINEL`].
    pub fn as_array(&self) -> [f64; 2] {
        [self.elapsed_s, self.dose_rate.unwrap_or(DOSE_RATE_SENTINEL)]
    }

    /// Whether the dose rate was read successfully.
    pub fn is_valid(&self) -> bool {
        self.dose_rate.is_some()
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) * 1e-9
}

/// Elapsed-seconds source for readings.
///
/// The wall clock is sampled once at construction; later values advance with
/// a monotonic [`Instant`], so successive calls never go backwards even if
/// the system clock is stepped.
#[derive(Debug, Clone, Copy)]
pub struct ElapsedClock {
    time_offset: f64,
    wall_at_anchor: f64,
    anchor: Instant,
}

impl ElapsedClock {
    /// `time_offset` is in seconds since the Unix epoch.
    pub fn new(time_offset: f64) -> Self {
        Self::with_wall_anchor(time_offset, unix_now())
    }

    /// Anchor at an explicit wall-clock time (seconds since the Unix epoch).
    pub fn with_wall_anchor(time_offset: f64, wall_at_anchor: f64) -> Self {
        Self {
            time_offset,
            wall_at_anchor,
            anchor: Instant::now(),
        }
    }

    /// Seconds between the offset and now.
    pub fn elapsed(&self) -> f64 {
        self.wall_at_anchor - self.time_offset + self.anchor.elapsed().as_secs_f64()
    }
}

/// Ordered warnings, appended during operation and drained by the caller.
#[derive(Debug, Default)]
pub struct WarningLog {
    entries: Mutex<Vec<String>>,
}

impl WarningLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a warning.
    pub fn push(&self, warning: impl Into<String>) {
        self.entries.lock().push(warning.into());
    }

    /// Return all warnings and leave the log empty.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.lock())
    }
}
