//! Result of resolving a requested coordinate against the archive.

use crate::archive::GridIndex;
use crate::coord::Coordinate;
use crate::dataset::DatasetSelector;

/// Immutable outcome of location resolution, created once per request and
/// shared by every monthly fetch of that request.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationResolution {
    requested: Coordinate,
    resolved: Coordinate,
    grid_index: GridIndex,
    selector: DatasetSelector,
    station_id: Option<String>,
}

impl LocationResolution {
    pub fn new(
        requested: Coordinate,
        resolved: Coordinate,
        grid_index: GridIndex,
        selector: DatasetSelector,
        station_id: Option<String>,
    ) -> Self {
        Self {
            requested,
            resolved,
            grid_index,
            selector,
            station_id,
        }
    }

    pub fn requested(&self) -> Coordinate {
        self.requested
    }

    pub fn resolved(&self) -> Coordinate {
        self.resolved
    }

    pub fn grid_index(&self) -> GridIndex {
        self.grid_index
    }

    pub fn selector(&self) -> DatasetSelector {
        self.selector
    }

    pub fn station_id(&self) -> Option<&str> {
        self.station_id.as_deref()
    }

    /// Great-circle distance between requested and resolved points (km).
    pub fn offset_km(&self) -> f64 {
        self.requested.great_circle_km(&self.resolved)
    }

    /// Region name for gridded data, station id for spectral data.
    pub fn source_label(&self) -> String {
        match (self.selector.region(), &self.station_id) {
            (Some(region), _) => region.as_str().to_string(),
            (None, Some(station)) => station.clone(),
            (None, None) => match self.grid_index {
                GridIndex::Station { index } => format!("station{}", index),
                GridIndex::Cell { .. } => "spec".to_string(),
            },
        }
    }

    /// Caller-facing identifier derived from the resolved coordinate.
    pub fn identifier(&self) -> String {
        self.resolved.identifier()
    }
}
