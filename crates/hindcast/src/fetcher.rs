//! Reads one month of point data for a resolved location.
//!
//! Only structural failures (file cannot be opened, time axis unusable) are
//! errors. A variable that cannot be read under its canonical name or any of
//! its aliases becomes a NaN series of the month's length.

use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use hindcast_common::{
    ArchiveError, HindcastArchive, LocationResolution, MonthFile, MonthlyRecord, VariableName,
    VariableSet, YearMonth,
};

use crate::config::{FetchConfig, HindcastConfig};

#[derive(Debug, Error)]
pub enum MonthlyFetchError {
    #[error("month {month}: cannot open {url}: {source}")]
    Unreachable {
        month: YearMonth,
        url: String,
        #[source]
        source: ArchiveError,
    },

    #[error("month {month}: unusable time axis: {reason}")]
    TimeAxis { month: YearMonth, reason: String },
}

impl MonthlyFetchError {
    pub fn month(&self) -> YearMonth {
        match self {
            MonthlyFetchError::Unreachable { month, .. } | MonthlyFetchError::TimeAxis { month, .. } => {
                *month
            }
        }
    }
}

/// Exponential backoff for opening monthly files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_retry_delay(),
            max_delay: config.max_retry_delay(),
        }
    }
}

/// Open `url`, retrying with exponential backoff.
pub fn open_with_retry(
    archive: &dyn HindcastArchive,
    url: &str,
    policy: RetryPolicy,
) -> Result<Box<dyn MonthFile>, ArchiveError> {
    let mut retry_count = 0;
    let mut delay = policy.initial_delay;

    loop {
        match archive.open(url) {
            Ok(file) => return Ok(file),
            Err(e) => {
                retry_count += 1;
                if retry_count > policy.max_retries {
                    return Err(e);
                }

                warn!(
                    url = %url,
                    error = %e,
                    retry = retry_count,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Open failed, retrying"
                );
                thread::sleep(delay);
                delay = std::cmp::min(delay * 2, policy.max_delay);
            }
        }
    }
}

/// Per-month reader. Shared by reference between scheduler workers.
pub struct MonthlyFetcher<'a> {
    archive: &'a dyn HindcastArchive,
    config: &'a HindcastConfig,
    retry: RetryPolicy,
}

impl<'a> MonthlyFetcher<'a> {
    pub fn new(archive: &'a dyn HindcastArchive, config: &'a HindcastConfig) -> Self {
        Self {
            archive,
            config,
            retry: RetryPolicy::from(&config.fetch),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch `month` from the URL derived from the resolution's selector.
    pub fn fetch_month(
        &self,
        resolution: &LocationResolution,
        month: YearMonth,
        variables: &[VariableName],
    ) -> Result<MonthlyRecord, MonthlyFetchError> {
        let url = self.config.archive.month_url(resolution.selector(), month);
        self.fetch(&url, resolution, month, variables)
    }

    pub fn fetch(
        &self,
        url: &str,
        resolution: &LocationResolution,
        month: YearMonth,
        variables: &[VariableName],
    ) -> Result<MonthlyRecord, MonthlyFetchError> {
        let file = open_with_retry(self.archive, url, self.retry).map_err(|source| {
            MonthlyFetchError::Unreachable {
                month,
                url: url.to_string(),
                source,
            }
        })?;

        let time = file.time_axis().map_err(|e| MonthlyFetchError::TimeAxis {
            month,
            reason: e.to_string(),
        })?;
        if time.is_empty() {
            return Err(MonthlyFetchError::TimeAxis {
                month,
                reason: "time axis is empty".to_string(),
            });
        }

        let mut set = VariableSet::new();
        for canonical in variables {
            let values = self
                .read_first_candidate(file.as_ref(), resolution, canonical, time.len())
                .unwrap_or_else(|| {
                    debug!(
                        month = %month,
                        variable = %canonical,
                        "No readable source for variable, filling with NaN"
                    );
                    vec![f64::NAN; time.len()]
                });
            set.insert(canonical.clone(), values);
        }

        MonthlyRecord::new(month, time, set).map_err(|e| MonthlyFetchError::TimeAxis {
            month,
            reason: e.to_string(),
        })
    }

    /// First candidate name yielding a series of exactly `len` samples.
    fn read_first_candidate(
        &self,
        file: &dyn MonthFile,
        resolution: &LocationResolution,
        canonical: &VariableName,
        len: usize,
    ) -> Option<Vec<f64>> {
        self.config
            .candidates(canonical)
            .iter()
            .find_map(|name| match file.read_point_series(name, resolution.grid_index()) {
                Ok(values) if values.len() == len => Some(values),
                Ok(values) => {
                    debug!(
                        candidate = %name,
                        samples = values.len(),
                        expected = len,
                        "Series length does not match time axis"
                    );
                    None
                }
                Err(e) => {
                    debug!(candidate = %name, error = %e, "Candidate not readable");
                    None
                }
            })
    }
}
