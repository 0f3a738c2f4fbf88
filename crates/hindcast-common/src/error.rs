//! Request-level error taxonomy.
//!
//! Failures local to one month or one variable never reach this type; they
//! are absorbed into gaps and NaN columns by the pipeline. What remains here
//! are the conditions that make a whole request meaningless.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::coord::Coordinate;
use crate::period::YearMonth;

/// Result type alias using HindcastError.
pub type HindcastResult<T> = Result<T, HindcastError>;

/// Primary error type returned by `load_hindcast` and its collaborators.
#[derive(Debug, Error)]
pub enum HindcastError {
    /// The request itself is malformed (bad coordinate, reversed period, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No usable grid cell or station within coverage / search radius.
    #[error("No usable grid point for {target}: {reason}")]
    LocationNotFound { target: Coordinate, reason: String },

    /// Every requested month failed or produced zero rows.
    #[error("No month between {start} and {end} produced usable data")]
    EmptyDataset { start: YearMonth, end: YearMonth },

    /// The reference file used for location resolution could not be read.
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Cache error: {0}")]
    Cache(String),

    /// Both assembly strategies failed.
    #[error("Assembly failed: {0}")]
    Assembly(String),

    #[error("Failed to persist dataset: {0}")]
    Persist(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl HindcastError {
    pub fn location_not_found(target: Coordinate, reason: impl Into<String>) -> Self {
        Self::LocationNotFound {
            target,
            reason: reason.into(),
        }
    }

    /// True for the explicit "nothing to write" signal.
    pub fn is_empty_dataset(&self) -> bool {
        matches!(self, Self::EmptyDataset { .. })
    }
}

