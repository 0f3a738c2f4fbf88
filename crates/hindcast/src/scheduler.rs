//! Drives monthly fetch and cache over a month range.
//!
//! Per-month failures are logged and absorbed; the caller sees them as
//! [`MonthOutcome::Failed`] entries and in the [`ScheduleReport`]. Outcomes
//! are always returned in the order of the input months, whatever order the
//! workers finish in.

use rayon::prelude::*;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use hindcast_common::{MonthlyRecord, YearMonth};
use storage::CacheError;

use crate::fetcher::MonthlyFetchError;

#[derive(Debug, Error)]
#[error("failed to start worker pool of width {width}: {message}")]
pub struct PoolInitError {
    pub width: usize,
    pub message: String,
}

/// Bounded pool of OS threads, created for one request and dropped with it.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    width: usize,
}

impl WorkerPool {
    pub fn new(width: usize) -> Result<Self, PoolInitError> {
        let width = width.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(|i| format!("hindcast-fetch-{}", i))
            .build()
            .map_err(|e| PoolInitError {
                width,
                message: e.to_string(),
            })?;
        Ok(Self { pool, width })
    }

    /// min(cap, host parallelism, months), at least 1.
    pub fn width_for(cap: usize, months: usize) -> usize {
        let host = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cap.min(host).min(months).max(1)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Pool to fetch on, or `None` to fetch sequentially when it failed to
    /// start.
    pub fn or_sequential(pool: Result<WorkerPool, PoolInitError>) -> Option<WorkerPool> {
        match pool {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(width = e.width, error = %e, "Worker pool unavailable, fetching sequentially");
                None
            }
        }
    }
}

/// Destination for fetched months. Implementations must tolerate concurrent
/// calls for distinct months.
pub trait MonthStore: Sync {
    fn has(&self, month: YearMonth) -> bool;
    fn store(&self, month: YearMonth, record: &MonthlyRecord) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Concurrent { workers: usize },
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => f.write_str("sequential"),
            ExecutionMode::Concurrent { workers } => write!(f, "concurrent({})", workers),
        }
    }
}

#[derive(Debug)]
pub enum MonthOutcome {
    /// Already cached; not fetched.
    Cached,
    /// Fetched and written to the store.
    Stored,
    /// Fetched but not stored (no store, or the write failed).
    Held(MonthlyRecord),
    Failed(MonthlyFetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub mode: ExecutionMode,
    pub fetched: usize,
    pub skipped: usize,
    pub failed_months: Vec<YearMonth>,
}

impl ScheduleReport {
    pub fn failed(&self) -> usize {
        self.failed_months.len()
    }
}

pub struct ScheduleOutput {
    pub outcomes: Vec<(YearMonth, MonthOutcome)>,
    pub report: ScheduleReport,
}

pub struct FetchScheduler;

impl FetchScheduler {
    /// Fetch every month not already in `store`. With a pool, months run
    /// concurrently on its threads; without one, in order on the caller's
    /// thread.
    pub fn run<F>(
        months: &[YearMonth],
        fetch: F,
        store: Option<&dyn MonthStore>,
        pool: Option<&WorkerPool>,
    ) -> ScheduleOutput
    where
        F: Fn(YearMonth) -> Result<MonthlyRecord, MonthlyFetchError> + Sync,
    {
        let process = |month: YearMonth| (month, process_month(month, &fetch, store));

        let (outcomes, mode) = match pool {
            Some(pool) => {
                let outcomes: Vec<_> = pool
                    .pool
                    .install(|| months.par_iter().map(|m| process(*m)).collect());
                (outcomes, ExecutionMode::Concurrent { workers: pool.width })
            }
            None => (
                months.iter().map(|m| process(*m)).collect(),
                ExecutionMode::Sequential,
            ),
        };

        let mut report = ScheduleReport {
            mode,
            fetched: 0,
            skipped: 0,
            failed_months: Vec::new(),
        };
        for (month, outcome) in &outcomes {
            match outcome {
                MonthOutcome::Cached => report.skipped += 1,
                MonthOutcome::Stored | MonthOutcome::Held(_) => report.fetched += 1,
                MonthOutcome::Failed(_) => report.failed_months.push(*month),
            }
        }

        info!(
            mode = %report.mode,
            fetched = report.fetched,
            skipped = report.skipped,
            failed = report.failed(),
            "Fetch schedule complete"
        );
        ScheduleOutput { outcomes, report }
    }
}

fn process_month<F>(month: YearMonth, fetch: &F, store: Option<&dyn MonthStore>) -> MonthOutcome
where
    F: Fn(YearMonth) -> Result<MonthlyRecord, MonthlyFetchError>,
{
    if store.is_some_and(|s| s.has(month)) {
        debug!(month = %month, "Month already cached, skipping");
        return MonthOutcome::Cached;
    }

    let record = match fetch(month) {
        Ok(record) => record,
        Err(e) => {
            warn!(month = %month, error = %e, "Month fetch failed");
            return MonthOutcome::Failed(e);
        }
    };
    debug!(month = %month, rows = record.rows(), "Fetched month");

    match store {
        Some(store) => match store.store(month, &record) {
            Ok(()) => MonthOutcome::Stored,
            Err(e) => {
                warn!(month = %month, error = %e, "Failed to cache month, keeping it in memory");
                MonthOutcome::Held(record)
            }
        },
        None => MonthOutcome::Held(record),
    }
}
