//! Storage for hindcast retrieval.
//!
//! Provides:
//! - [`MonthlyCache`]: resumable on-disk cache of per-month point records
//! - [`DatasetPersister`]: CSV table and JSON metadata output

pub mod monthly;
pub mod persist;

pub use monthly::{CacheError, CacheKey, CacheResult, CacheStats, MonthlyCache, CACHE_FORMAT_VERSION};
pub use persist::{DatasetPersister, PersistError, PersistResult, PersistedPaths};

impl From<CacheError> for hindcast_common::HindcastError {
    fn from(e: CacheError) -> Self {
        hindcast_common::HindcastError::Cache(e.to_string())
    }
}

impl From<PersistError> for hindcast_common::HindcastError {
    fn from(e: PersistError) -> Self {
        hindcast_common::HindcastError::Persist(e.to_string())
    }
}
