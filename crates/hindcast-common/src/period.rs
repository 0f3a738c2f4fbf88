//! Year-month periods, the unit of fetch and cache granularity.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors parsing or validating a period.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PeriodParseError {
    #[error("invalid year-month '{0}' (expected YYYYMM or YYYY-MM)")]
    InvalidFormat(String),

    #[error("month {0} out of range 1-12")]
    InvalidMonth(u32),

    #[error("start {start} is after end {end}")]
    Reversed { start: YearMonth, end: YearMonth },
}

/// A calendar month, ordered chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodParseError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodParseError::InvalidMonth(month));
        }
        Ok(Self { year, month })
    }

    /// Build from the `year * 100 + month` form, e.g. `201501`.
    pub fn from_yyyymm(value: u32) -> Result<Self, PeriodParseError> {
        Self::new((value / 100) as i32, value % 100)
    }

    pub fn yyyymm(&self) -> u32 {
        self.year as u32 * 100 + self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn days_in_month(&self) -> u32 {
        let first = self.first_day();
        let next = self.next().first_day();
        (next - first).num_days() as u32
    }

    /// Midnight UTC on the first day of the month.
    pub fn start_instant(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.first_day().and_time(NaiveTime::default()))
    }

    fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || PeriodParseError::InvalidFormat(s.to_string());

        let (year, month) = if let Some((y, m)) = trimmed.split_once('-') {
            (y, m)
        } else if trimmed.len() == 6 {
            trimmed.split_at(4)
        } else {
            return Err(invalid());
        };

        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<u32> for YearMonth {
    type Error = PeriodParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_yyyymm(value)
    }
}

impl From<YearMonth> for u32 {
    fn from(value: YearMonth) -> Self {
        value.yyyymm()
    }
}

/// All months from `start` to `end`, inclusive, in ascending order.
pub fn month_range(start: YearMonth, end: YearMonth) -> Result<Vec<YearMonth>, PeriodParseError> {
    if start > end {
        return Err(PeriodParseError::Reversed { start, end });
    }
    let mut months = Vec::new();
    let mut current = start;
    while current <= end {
        months.push(current);
        current = current.next();
    }
    Ok(months)
}
