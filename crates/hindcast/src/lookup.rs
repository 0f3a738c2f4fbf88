//! Precomputed location tables.
//!
//! Valid-point tables list the ocean cells of one gridded region:
//!
//! ```text
//! lon_index,lat_index,longitude,latitude
//! 120,85,145.2,-40.0
//! ```
//!
//! Station tables list the spectral output stations:
//!
//! ```text
//! index,station,longitude,latitude
//! 0,CAPE_SORELL,145.1,-42.2
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use hindcast_common::{Coordinate, HindcastError, SearchBox};

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("failed to read lookup table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("lookup table {0} has no rows")]
    Empty(PathBuf),
}

impl From<LookupError> for HindcastError {
    fn from(e: LookupError) -> Self {
        HindcastError::Config(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ValidPoint {
    pub lon_index: usize,
    pub lat_index: usize,
    pub longitude: f64,
    pub latitude: f64,
}

impl ValidPoint {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.longitude, self.latitude)
    }
}

/// Ocean cells of one gridded region, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPointTable {
    points: Vec<ValidPoint>,
    extent: SearchBox,
}

impl ValidPointTable {
    pub fn new(points: Vec<ValidPoint>) -> Option<Self> {
        let coords: Vec<Coordinate> = points.iter().map(ValidPoint::coordinate).collect();
        let extent = SearchBox::enclosing(&coords)?;
        Some(Self { points, extent })
    }

    pub fn load(path: &Path) -> Result<Self, LookupError> {
        let points = read_rows(path)?;
        Self::new(points).ok_or_else(|| LookupError::Empty(path.to_path_buf()))
    }

    pub fn points(&self) -> &[ValidPoint] {
        &self.points
    }

    /// Bounding box of all listed cells.
    pub fn extent(&self) -> SearchBox {
        self.extent
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StationEntry {
    pub index: usize,
    pub station: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl StationEntry {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.longitude, self.latitude)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StationTable {
    stations: Vec<StationEntry>,
}

impl StationTable {
    pub fn new(stations: Vec<StationEntry>) -> Option<Self> {
        if stations.is_empty() {
            return None;
        }
        Some(Self { stations })
    }

    pub fn load(path: &Path) -> Result<Self, LookupError> {
        let stations = read_rows(path)?;
        Self::new(stations).ok_or_else(|| LookupError::Empty(path.to_path_buf()))
    }

    pub fn stations(&self) -> &[StationEntry] {
        &self.stations
    }
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, LookupError> {
    let csv_err = |source| LookupError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    reader.deserialize().collect::<Result<Vec<T>, _>>().map_err(csv_err)
}
