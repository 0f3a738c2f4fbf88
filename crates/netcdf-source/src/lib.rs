//! NetCDF implementation of the hindcast archive traits.
//!
//! Opens monthly files through the native netcdf library, which accepts local
//! paths as well as OPeNDAP URLs when built with DAP support. Values are
//! unpacked (`scale_factor`, `add_offset`) and fill markers become NaN.
//!
//! Supported variable layouts:
//! - gridded: `(time, lat, lon)` or `(time, lon, lat)`
//! - spectral: `(time, station)` or `(station, time)`

pub mod native;

use chrono::{DateTime, Utc};
use hindcast_common::{ArchiveError, Coordinate, GridIndex, HindcastArchive, MonthFile, TimeUnits};
use std::ops::Range;
use tracing::debug;

use native::{dim_roles, get_str_attr, silence_hdf5_errors, DimRole, Packing};

/// Archive backed by the netcdf C library.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetCdfArchive;

impl NetCdfArchive {
    pub fn new() -> Self {
        Self
    }
}

impl HindcastArchive for NetCdfArchive {
    fn open(&self, url: &str) -> Result<Box<dyn MonthFile>, ArchiveError> {
        silence_hdf5_errors();
        debug!(url = %url, "Opening monthly file");
        let file = netcdf::open(url).map_err(|e| ArchiveError::Open {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(NetCdfMonthFile {
            file,
            url: url.to_string(),
        }))
    }
}

/// One opened monthly file.
pub struct NetCdfMonthFile {
    file: netcdf::File,
    url: String,
}

impl NetCdfMonthFile {
    pub fn url(&self) -> &str {
        &self.url
    }

    fn variable(&self, name: &str) -> Result<netcdf::Variable<'_>, ArchiveError> {
        self.file
            .variable(name)
            .ok_or_else(|| ArchiveError::MissingVariable(name.to_string()))
    }

    /// First of `names` present in the file.
    fn first_variable(&self, names: &[&str]) -> Result<netcdf::Variable<'_>, ArchiveError> {
        names
            .iter()
            .find_map(|n| self.file.variable(n))
            .ok_or_else(|| ArchiveError::MissingVariable(names.join("|")))
    }
}

fn read_unpacked<E>(var: &netcdf::Variable, name: &str, extents: E) -> Result<Vec<f64>, ArchiveError>
where
    E: TryInto<netcdf::Extents>,
    E::Error: Into<netcdf::Error>,
{
    let mut values: Vec<f64> = var
        .get_values::<f64, _>(extents)
        .map_err(|e| ArchiveError::read(name, e))?;
    Packing::of(var).apply(&mut values);
    Ok(values)
}

fn check_index(variable: &str, role: &str, index: usize, len: usize) -> Result<(), ArchiveError> {
    if index >= len {
        return Err(ArchiveError::layout(
            variable,
            format!("{} index {} out of bounds ({})", role, index, len),
        ));
    }
    Ok(())
}

impl MonthFile for NetCdfMonthFile {
    fn time_axis(&self) -> Result<Vec<DateTime<Utc>>, ArchiveError> {
        let var = self.variable("time")?;
        let units = get_str_attr(&var, "units")
            .ok_or_else(|| ArchiveError::TimeAxis("time variable has no units".to_string()))?;
        let units = TimeUnits::parse(&units).map_err(|e| ArchiveError::TimeAxis(e.to_string()))?;

        let raw = read_unpacked(&var, "time", ..)?;
        if raw.is_empty() {
            return Err(ArchiveError::TimeAxis("time axis is empty".to_string()));
        }
        raw.iter()
            .enumerate()
            .map(|(i, v)| {
                units.to_instant(*v).ok_or_else(|| {
                    ArchiveError::TimeAxis(format!("time step {} is not a valid offset", i))
                })
            })
            .collect()
    }

    fn axis(&self, name: &str) -> Result<Vec<f64>, ArchiveError> {
        let var = self.variable(name)?;
        if var.dimensions().len() != 1 {
            return Err(ArchiveError::layout(name, "coordinate axis must be one-dimensional"));
        }
        read_unpacked(&var, name, ..)
    }

    fn read_point_series(&self, variable: &str, index: GridIndex) -> Result<Vec<f64>, ArchiveError> {
        let var = self.variable(variable)?;
        let roles = dim_roles(&var);
        let dims = var.dimensions();

        match (index, roles.as_slice()) {
            (GridIndex::Cell { lat_index, lon_index }, [DimRole::Time, DimRole::Lat, DimRole::Lon]) => {
                check_index(variable, "lat", lat_index, dims[1].len())?;
                check_index(variable, "lon", lon_index, dims[2].len())?;
                read_unpacked(&var, variable, (.., lat_index, lon_index))
            }
            (GridIndex::Cell { lat_index, lon_index }, [DimRole::Time, DimRole::Lon, DimRole::Lat]) => {
                check_index(variable, "lon", lon_index, dims[1].len())?;
                check_index(variable, "lat", lat_index, dims[2].len())?;
                read_unpacked(&var, variable, (.., lon_index, lat_index))
            }
            (GridIndex::Station { index }, [DimRole::Time, DimRole::Station]) => {
                check_index(variable, "station", index, dims[1].len())?;
                read_unpacked(&var, variable, (.., index))
            }
            (GridIndex::Station { index }, [DimRole::Station, DimRole::Time]) => {
                check_index(variable, "station", index, dims[0].len())?;
                read_unpacked(&var, variable, (index, ..))
            }
            (_, roles) => Err(ArchiveError::layout(
                variable,
                format!("cannot read {:?} from dimensions {:?}", index, roles),
            )),
        }
    }

    fn read_first_step(
        &self,
        variable: &str,
        lat: Range<usize>,
        lon: Range<usize>,
    ) -> Result<Vec<f64>, ArchiveError> {
        let var = self.variable(variable)?;
        let roles = dim_roles(&var);
        let dims = var.dimensions();
        if lat.is_empty() || lon.is_empty() {
            return Ok(Vec::new());
        }

        match roles.as_slice() {
            [DimRole::Time, DimRole::Lat, DimRole::Lon] => {
                check_index(variable, "lat", lat.end - 1, dims[1].len())?;
                check_index(variable, "lon", lon.end - 1, dims[2].len())?;
                read_unpacked(&var, variable, (0usize, lat, lon))
            }
            [DimRole::Time, DimRole::Lon, DimRole::Lat] => {
                check_index(variable, "lon", lon.end - 1, dims[1].len())?;
                check_index(variable, "lat", lat.end - 1, dims[2].len())?;
                let (n_lat, n_lon) = (lat.len(), lon.len());
                let lon_major = read_unpacked(&var, variable, (0usize, lon, lat))?;
                // transpose to latitude-outer order
                let mut out = vec![f64::NAN; lon_major.len()];
                for i in 0..n_lon {
                    for j in 0..n_lat {
                        out[j * n_lon + i] = lon_major[i * n_lat + j];
                    }
                }
                Ok(out)
            }
            roles => Err(ArchiveError::layout(
                variable,
                format!("expected a gridded variable, found dimensions {:?}", roles),
            )),
        }
    }

    fn station_coordinates(&self) -> Result<Vec<Coordinate>, ArchiveError> {
        let lon_var = self.first_variable(&["longitude", "lon"])?;
        let lat_var = self.first_variable(&["latitude", "lat"])?;
        let lons = read_station_axis(&lon_var, "longitude")?;
        let lats = read_station_axis(&lat_var, "latitude")?;
        if lons.len() != lats.len() {
            return Err(ArchiveError::layout(
                "longitude",
                format!("{} longitudes but {} latitudes", lons.len(), lats.len()),
            ));
        }
        Ok(lons
            .into_iter()
            .zip(lats)
            .map(|(lon, lat)| Coordinate::new(lon, lat))
            .collect())
    }
}

/// Station positions are either static `(station)` or repeated per time
/// step `(time, station)`; the first step is taken for the latter.
fn read_station_axis(var: &netcdf::Variable, name: &str) -> Result<Vec<f64>, ArchiveError> {
    match dim_roles(var).as_slice() {
        [DimRole::Station] => read_unpacked(var, name, ..),
        [DimRole::Time, DimRole::Station] => read_unpacked(var, name, (0usize, ..)),
        [DimRole::Station, DimRole::Time] => read_unpacked(var, name, (.., 0usize)),
        roles => Err(ArchiveError::layout(
            name,
            format!("unsupported station coordinate dimensions {:?}", roles),
        )),
    }
}
