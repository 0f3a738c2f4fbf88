//! Hindcast point retrieval.
//!
//! A request names a coordinate, a month range and a dataset kind.
//! [`load_hindcast`] resolves the coordinate to the nearest valid grid cell
//! or station ([`GridLocator`]), fetches every month not already cached
//! ([`FetchScheduler`], [`MonthlyFetcher`]), concatenates the months into one
//! time-ordered table ([`DatasetAssembler`]) and optionally writes it out.

pub mod assembler;
pub mod config;
pub mod fetcher;
pub mod locator;
pub mod lookup;
pub mod pipeline;
pub mod scheduler;

pub use assembler::{AssemblyError, AssemblyStrategy, DatasetAssembler, MonthlySource};
pub use config::{
    ArchiveConfig, AssemblyConfig, CacheConfig, ConfigError, FetchConfig, HindcastConfig,
    LookupConfig, DEFAULT_BASE_URL,
};
pub use fetcher::{open_with_retry, MonthlyFetchError, MonthlyFetcher, RetryPolicy};
pub use locator::GridLocator;
pub use lookup::{LookupError, StationEntry, StationTable, ValidPoint, ValidPointTable};
pub use pipeline::{load_hindcast, HindcastOutput, LoadOptions};
pub use scheduler::{
    ExecutionMode, FetchScheduler, MonthOutcome, MonthStore, PoolInitError, ScheduleOutput,
    ScheduleReport, WorkerPool,
};
