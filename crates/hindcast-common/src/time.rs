//! CF-convention time axis decoding (`"days since 1990-01-01 00:00:00"`).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TimeParseError {
    #[error("time units '{0}' are not of the form '<unit> since <epoch>'")]
    InvalidUnits(String),

    #[error("unsupported time unit '{0}'")]
    UnsupportedUnit(String),

    #[error("cannot parse reference time '{0}'")]
    InvalidEpoch(String),
}

/// Decoded `units` attribute of a time variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    /// Length of one unit step in seconds
    pub step_seconds: f64,
    /// Reference instant the offsets count from
    pub epoch: DateTime<Utc>,
}

impl TimeUnits {
    pub fn parse(units: &str) -> Result<Self, TimeParseError> {
        let lower = units.trim().to_lowercase();
        let (unit, epoch) = lower
            .split_once(" since ")
            .ok_or_else(|| TimeParseError::InvalidUnits(units.to_string()))?;

        let step_seconds = match unit.trim() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
            "days" | "day" | "d" => 86400.0,
            other => return Err(TimeParseError::UnsupportedUnit(other.to_string())),
        };

        let epoch = parse_epoch(epoch.trim())?;
        Ok(Self {
            step_seconds,
            epoch,
        })
    }

    /// Convert one raw axis value to an instant, rounded to the millisecond.
    ///
    /// Returns None for non-finite values.
    pub fn to_instant(&self, value: f64) -> Option<DateTime<Utc>> {
        if !value.is_finite() {
            return None;
        }
        let millis = (value * self.step_seconds * 1000.0).round() as i64;
        Some(self.epoch + Duration::milliseconds(millis))
    }
}

/// Parse a CF reference time. Tries full datetime forms first, then a bare date.
fn parse_epoch(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let cleaned = s
        .trim_end_matches(" utc")
        .trim_end_matches(" gmt")
        .trim_end_matches('z')
        .trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }

    const FORMATS: [&str; 6] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dt%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dt%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dt%H:%M",
    ];
    for fmt in FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    Err(TimeParseError::InvalidEpoch(s.to_string()))
}
