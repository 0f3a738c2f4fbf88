//! Resolves a requested coordinate to a grid cell or station.
//!
//! Distances are planar on (lon, lat) degrees, not geodesic. Within the
//! search box cells are scanned latitude-major, and a candidate only replaces
//! the current best when strictly closer, so ties keep the first cell found.

use std::ops::Range;
use tracing::{debug, info, warn};

use hindcast_common::{
    normalize_lon, Coordinate, DatasetSelector, GridIndex, HindcastArchive, HindcastError,
    HindcastResult, LocationResolution, MonthFile, Region, SearchBox, YearMonth,
};

use crate::config::HindcastConfig;
use crate::fetcher::{open_with_retry, RetryPolicy};
use crate::lookup::{StationTable, ValidPointTable};

const LAT_AXIS_NAMES: [&str; 2] = ["latitude", "lat"];
const LON_AXIS_NAMES: [&str; 2] = ["longitude", "lon"];

pub struct GridLocator<'a> {
    archive: &'a dyn HindcastArchive,
    config: &'a HindcastConfig,
    reference_months: &'a [YearMonth],
    retry: RetryPolicy,
    valid_points: Option<ValidPointTable>,
    stations: Option<StationTable>,
}

impl<'a> GridLocator<'a> {
    /// Live scans read the first of `reference_months` whose file opens.
    pub fn new(
        archive: &'a dyn HindcastArchive,
        config: &'a HindcastConfig,
        reference_months: &'a [YearMonth],
    ) -> Self {
        Self {
            archive,
            config,
            reference_months,
            retry: RetryPolicy::from(&config.fetch),
            valid_points: None,
            stations: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Use a valid-point table instead of a live scan for gridded requests.
    pub fn with_valid_points(mut self, table: ValidPointTable) -> Self {
        self.valid_points = Some(table);
        self
    }

    pub fn with_stations(mut self, table: StationTable) -> Self {
        self.stations = Some(table);
        self
    }

    pub fn resolve(
        &self,
        target: Coordinate,
        selector: DatasetSelector,
    ) -> HindcastResult<LocationResolution> {
        let resolution = match selector {
            DatasetSelector::Gridded { region } => match self.valid_point_table(region)? {
                Some(table) => resolve_from_table(target, selector, &table, self.config.search_radius_deg)?,
                None => self.scan_grid(target, selector)?,
            },
            DatasetSelector::Spectral => self.resolve_station(target)?,
        };

        info!(
            requested = %resolution.requested(),
            resolved = %resolution.resolved(),
            offset_km = resolution.offset_km(),
            index = ?resolution.grid_index(),
            "Resolved location"
        );
        Ok(resolution)
    }

    fn valid_point_table(&self, region: Region) -> HindcastResult<Option<ValidPointTable>> {
        if let Some(table) = &self.valid_points {
            return Ok(Some(table.clone()));
        }
        match self.config.lookup.valid_points.get(&region) {
            Some(path) => Ok(Some(ValidPointTable::load(path)?)),
            None => Ok(None),
        }
    }

    /// A month in an outage is skipped; the scan fails only when no
    /// reference file opens.
    fn open_reference(&self, selector: DatasetSelector) -> HindcastResult<Box<dyn MonthFile>> {
        let mut last_err = None;
        for &month in self.reference_months {
            let url = self.config.archive.month_url(selector, month);
            debug!(url = %url, "Opening reference file for location scan");
            match open_with_retry(self.archive, &url, self.retry) {
                Ok(file) => return Ok(file),
                Err(e) => {
                    warn!(month = %month, error = %e, "Reference file unavailable, trying next month");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .map(HindcastError::from)
            .unwrap_or_else(|| HindcastError::InvalidRequest("no months to scan".to_string())))
    }

    /// Live scan of the reference file's axes and first time step.
    fn scan_grid(&self, target: Coordinate, selector: DatasetSelector) -> HindcastResult<LocationResolution> {
        let file = self.open_reference(selector)?;
        let lats = read_axis(file.as_ref(), &LAT_AXIS_NAMES)?;
        let lons: Vec<f64> = read_axis(file.as_ref(), &LON_AXIS_NAMES)?
            .into_iter()
            .map(normalize_lon)
            .collect();

        let radius = self.config.search_radius_deg;
        let bbox = SearchBox::around(&target, radius);
        let (lat_range, lon_range) = match (
            index_span(&lats, |v| bbox.contains_lat(v)),
            index_span(&lons, |v| bbox.contains_lon(v)),
        ) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(HindcastError::location_not_found(
                    target,
                    format!("no grid cell within {} degrees", radius),
                ))
            }
        };

        let block = file.read_first_step(
            &self.config.reference_variable,
            lat_range.clone(),
            lon_range.clone(),
        )?;
        let n_lon = lon_range.len();

        let mut nearest: Option<(f64, usize, usize)> = None;
        let mut nearest_valid: Option<(f64, usize, usize)> = None;
        for (row, j) in lat_range.clone().enumerate() {
            for (col, i) in lon_range.clone().enumerate() {
                let cell = Coordinate::new(lons[i], lats[j]);
                if !bbox.contains(&cell) {
                    continue;
                }
                let d = target.planar_distance(&cell);
                if nearest.map_or(true, |(best, _, _)| d < best) {
                    nearest = Some((d, j, i));
                }
                let valid = block.get(row * n_lon + col).is_some_and(|v| v.is_finite());
                if valid && nearest_valid.map_or(true, |(best, _, _)| d < best) {
                    nearest_valid = Some((d, j, i));
                }
            }
        }

        if let (Some((_, j, i)), Some((_, vj, vi))) = (nearest, nearest_valid) {
            if (j, i) != (vj, vi) {
                debug!(
                    nearest_lat = lats[j],
                    nearest_lon = lons[i],
                    "Nearest cell has no data, using nearest valid cell"
                );
            }
        }

        let (_, j, i) = nearest_valid.ok_or_else(|| {
            HindcastError::location_not_found(
                target,
                format!("no valid ocean cell within {} degrees", radius),
            )
        })?;

        Ok(LocationResolution::new(
            target,
            Coordinate::new(lons[i], lats[j]),
            GridIndex::Cell {
                lat_index: j,
                lon_index: i,
            },
            selector,
            None,
        ))
    }

    fn resolve_station(&self, target: Coordinate) -> HindcastResult<LocationResolution> {
        let table = match &self.stations {
            Some(table) => Some(table.clone()),
            None => match &self.config.lookup.stations {
                Some(path) => Some(StationTable::load(path)?),
                None => None,
            },
        };

        let (index, station_id, resolved) = match table {
            Some(table) => {
                let best = nearest_by(table.stations(), |s| target.planar_distance(&s.coordinate()))
                    .ok_or_else(|| HindcastError::location_not_found(target, "station table is empty"))?;
                (best.index, Some(best.station.clone()), best.coordinate())
            }
            None => {
                let file = self.open_reference(DatasetSelector::Spectral)?;
                let stations: Vec<(usize, Coordinate)> =
                    file.station_coordinates()?.into_iter().enumerate().collect();
                let &(index, coord) = nearest_by(&stations, |(_, c)| target.planar_distance(c))
                    .ok_or_else(|| HindcastError::location_not_found(target, "file lists no stations"))?;
                (index, None, coord)
            }
        };

        Ok(LocationResolution::new(
            target,
            resolved,
            GridIndex::Station { index },
            DatasetSelector::Spectral,
            station_id,
        ))
    }
}

/// Nearest valid table cell; the target must lie within the table extent
/// padded by `radius`.
fn resolve_from_table(
    target: Coordinate,
    selector: DatasetSelector,
    table: &ValidPointTable,
    radius: f64,
) -> HindcastResult<LocationResolution> {
    let coverage = table.extent().padded(radius);
    if !coverage.contains(&target) {
        return Err(HindcastError::location_not_found(
            target,
            "outside the coverage of the valid-point table",
        ));
    }
    let point = nearest_by(table.points(), |p| target.planar_distance(&p.coordinate()))
        .ok_or_else(|| HindcastError::location_not_found(target, "valid-point table is empty"))?;

    Ok(LocationResolution::new(
        target,
        point.coordinate(),
        GridIndex::Cell {
            lat_index: point.lat_index,
            lon_index: point.lon_index,
        },
        selector,
        None,
    ))
}

/// First item with the smallest distance.
fn nearest_by<T>(items: &[T], distance: impl Fn(&T) -> f64) -> Option<&T> {
    let mut best: Option<(f64, &T)> = None;
    for item in items {
        let d = distance(item);
        if best.map_or(true, |(b, _)| d < b) {
            best = Some((d, item));
        }
    }
    best.map(|(_, item)| item)
}

fn read_axis(file: &dyn MonthFile, names: &[&str]) -> HindcastResult<Vec<f64>> {
    let mut last_err = None;
    for name in names {
        match file.axis(name) {
            Ok(values) => return Ok(values),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err
        .map(HindcastError::from)
        .unwrap_or_else(|| HindcastError::InvalidRequest("no axis names given".to_string())))
}

/// Smallest index range covering every value matching `keep`.
fn index_span(values: &[f64], keep: impl Fn(f64) -> bool) -> Option<Range<usize>> {
    let first = values.iter().position(|v| keep(*v))?;
    let last = values.iter().rposition(|v| keep(*v))?;
    Some(first..last + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{StationEntry, ValidPoint};

    #[test]
    fn test_index_span() {
        let values = [144.0, 144.5, 145.0, 145.5, 146.0];
        assert_eq!(index_span(&values, |v| (144.4..=145.6).contains(&v)), Some(1..4));
        assert_eq!(index_span(&values, |v| v > 200.0), None);
    }

    #[test]
    fn test_nearest_by_keeps_first_on_tie() {
        let items = [3.0, 1.0, 1.0, 2.0];
        let best = nearest_by(&items, |v| *v).unwrap();
        assert!(std::ptr::eq(best, &items[1]));
    }

    #[test]
    fn test_table_resolution() {
        let table = ValidPointTable::new(vec![
            ValidPoint { lon_index: 0, lat_index: 0, longitude: 145.0, latitude: -40.0 },
            ValidPoint { lon_index: 1, lat_index: 0, longitude: 145.2, latitude: -40.0 },
        ])
        .unwrap();
        let selector = DatasetSelector::Gridded { region: Region::Aus4m };

        let res = resolve_from_table(Coordinate::new(145.17, -40.02), selector, &table, 0.5).unwrap();
        assert_eq!(res.grid_index(), GridIndex::Cell { lat_index: 0, lon_index: 1 });

        let err = resolve_from_table(Coordinate::new(150.0, -40.0), selector, &table, 0.5).unwrap_err();
        assert!(matches!(err, HindcastError::LocationNotFound { .. }));
    }

    #[test]
    fn test_station_table_resolution() {
        struct NoArchive;
        impl HindcastArchive for NoArchive {
            fn open(&self, url: &str) -> Result<Box<dyn MonthFile>, hindcast_common::ArchiveError> {
                Err(hindcast_common::ArchiveError::Open {
                    url: url.to_string(),
                    message: "offline".to_string(),
                })
            }
        }

        let config = HindcastConfig::default();
        let stations = StationTable::new(vec![
            StationEntry { index: 4, station: "A".into(), longitude: 150.0, latitude: -30.0 },
            StationEntry { index: 9, station: "B".into(), longitude: 151.0, latitude: -31.0 },
        ])
        .unwrap();
        let months = [YearMonth::new(2015, 1).unwrap()];
        let locator = GridLocator::new(&NoArchive, &config, &months).with_stations(stations);

        let res = locator
            .resolve(Coordinate::new(150.9, -30.8), DatasetSelector::Spectral)
            .unwrap();
        assert_eq!(res.grid_index(), GridIndex::Station { index: 9 });
        assert_eq!(res.station_id(), Some("B"));
        assert_eq!(res.source_label(), "B");
    }

    #[test]
    fn test_live_scan_without_any_reference_file_fails() {
        struct NoArchive;
        impl HindcastArchive for NoArchive {
            fn open(&self, url: &str) -> Result<Box<dyn MonthFile>, hindcast_common::ArchiveError> {
                Err(hindcast_common::ArchiveError::Open {
                    url: url.to_string(),
                    message: "offline".to_string(),
                })
            }
        }

        let mut config = HindcastConfig::default();
        config.fetch.max_retries = 0;
        let selector = DatasetSelector::Gridded { region: Region::Aus4m };
        let months = [YearMonth::new(2015, 1).unwrap(), YearMonth::new(2015, 2).unwrap()];
        let err = GridLocator::new(&NoArchive, &config, &months)
            .resolve(Coordinate::new(145.17, -40.02), selector)
            .unwrap_err();
        assert!(matches!(err, HindcastError::Archive(_)), "unexpected error: {err}");
        assert!(err.to_string().contains("201502"), "last month's error is reported: {err}");

        let err = GridLocator::new(&NoArchive, &config, &[])
            .resolve(Coordinate::new(145.17, -40.02), selector)
            .unwrap_err();
        assert!(matches!(err, HindcastError::InvalidRequest(_)));
    }
}
