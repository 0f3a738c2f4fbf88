//! Access traits for the upstream array archive.
//!
//! The archive serves one file per month, addressable by URL, holding named
//! numeric variables indexed by a time axis and either a (latitude,
//! longitude) grid or a station dimension. Only point series and the first
//! time step of a small block are ever read.

use chrono::{DateTime, Utc};
use std::ops::Range;
use thiserror::Error;

use crate::coord::Coordinate;

/// Errors raised by archive implementations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file could not be opened (unreachable URL, missing file, bad format).
    #[error("failed to open {url}: {message}")]
    Open { url: String, message: String },

    #[error("variable '{0}' not found")]
    MissingVariable(String),

    #[error("failed to read '{variable}': {message}")]
    Read { variable: String, message: String },

    /// The variable exists but its dimensions are not what the reader expects.
    #[error("unexpected layout for '{variable}': {message}")]
    Layout { variable: String, message: String },

    #[error("invalid time axis: {0}")]
    TimeAxis(String),
}

impl ArchiveError {
    pub fn read(variable: impl Into<String>, message: impl ToString) -> Self {
        Self::Read {
            variable: variable.into(),
            message: message.to_string(),
        }
    }

    pub fn layout(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Layout {
            variable: variable.into(),
            message: message.into(),
        }
    }
}

/// Position of the resolved point inside a monthly file.
///
/// Only meaningful for the dataset type/region the location was resolved
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridIndex {
    Cell { lat_index: usize, lon_index: usize },
    Station { index: usize },
}

/// Opens monthly files. Shared read-only between fetch workers.
pub trait HindcastArchive: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn MonthFile>, ArchiveError>;
}

/// One opened monthly file.
pub trait MonthFile {
    /// Decoded time axis.
    fn time_axis(&self) -> Result<Vec<DateTime<Utc>>, ArchiveError>;

    /// Full contents of a one-dimensional coordinate variable.
    fn axis(&self, name: &str) -> Result<Vec<f64>, ArchiveError>;

    /// Every time step of `variable` at one grid cell or station, with
    /// packing and fill values decoded (fill becomes NaN).
    fn read_point_series(&self, variable: &str, index: GridIndex) -> Result<Vec<f64>, ArchiveError>;

    /// First time step of a gridded `variable` over a latitude/longitude index
    /// block, row-major (latitude outer).
    fn read_first_step(
        &self,
        variable: &str,
        lat: Range<usize>,
        lon: Range<usize>,
    ) -> Result<Vec<f64>, ArchiveError>;

    /// Station positions of a spectral file, in station index order.
    fn station_coordinates(&self) -> Result<Vec<Coordinate>, ArchiveError>;
}
