//! Geographic coordinates and search boxes.
//!
//! Longitudes are stored in degrees East on [0, 360). Nearest-point searches
//! use planar distance on (lon, lat) degrees; the great-circle distance is
//! only used to report how far the resolved point is from the target.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HindcastError;

/// Mean Earth radius used for offset reporting (km).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Normalize a longitude to [0, 360).
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = lon.rem_euclid(360.0) + 0.0;
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// A (longitude °E, latitude °N) pair with longitude normalized to [0, 360).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    /// Create a coordinate, normalizing the longitude.
    ///
    /// Accepts longitudes on either [-180, 180) or [0, 360).
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon: normalize_lon(lon),
            lat,
        }
    }

    /// Create a coordinate from user input, rejecting non-finite values and
    /// latitudes outside [-90, 90].
    pub fn try_new(lon: f64, lat: f64) -> Result<Self, HindcastError> {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(HindcastError::InvalidRequest(format!(
                "coordinate ({}, {}) is not finite",
                lon, lat
            )));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(HindcastError::InvalidRequest(format!(
                "latitude {} outside [-90, 90]",
                lat
            )));
        }
        Ok(Self::new(lon, lat))
    }

    /// Planar Euclidean distance in degrees on (lon, lat).
    pub fn planar_distance(&self, other: &Coordinate) -> f64 {
        (self.lon - other.lon).hypot(self.lat - other.lat)
    }

    /// Haversine great-circle distance in kilometres.
    pub fn great_circle_km(&self, other: &Coordinate) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lon - self.lon).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Human-facing identifier, e.g. `145.167E_40.033S`.
    ///
    /// Longitudes past 180 are written as degrees West.
    pub fn identifier(&self) -> String {
        let (lon, ew) = if self.lon > 180.0 {
            (360.0 - self.lon, 'W')
        } else {
            (self.lon, 'E')
        };
        let (lat, ns) = if self.lat < 0.0 {
            (-self.lat, 'S')
        } else {
            (self.lat, 'N')
        };
        format!("{:.3}{}_{:.3}{}", lon, ew, lat, ns)
    }

    /// Token used in cache directory names. Stable for identical inputs.
    pub fn storage_token(&self) -> String {
        format!("{:.4}E_{:.4}N", self.lon, self.lat)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}°E, {:.4}°N)", self.lon, self.lat)
    }
}

/// Axis-aligned box in (lon, lat) degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl SearchBox {
    /// Square box of half-width `radius` degrees centred on `center`.
    ///
    /// No wrapping across the 0/360 meridian.
    pub fn around(center: &Coordinate, radius: f64) -> Self {
        Self {
            min_lon: center.lon - radius,
            max_lon: center.lon + radius,
            min_lat: center.lat - radius,
            max_lat: center.lat + radius,
        }
    }

    /// Smallest box containing all points, or None for an empty iterator.
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a Coordinate>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self {
            min_lon: first.lon,
            max_lon: first.lon,
            min_lat: first.lat,
            max_lat: first.lat,
        };
        for p in iter {
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.max_lon = bbox.max_lon.max(p.lon);
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.max_lat = bbox.max_lat.max(p.lat);
        }
        Some(bbox)
    }

    /// Grow the box by `margin` degrees on every side.
    pub fn padded(&self, margin: f64) -> Self {
        Self {
            min_lon: self.min_lon - margin,
            max_lon: self.max_lon + margin,
            min_lat: self.min_lat - margin,
            max_lat: self.max_lat + margin,
        }
    }

    pub fn contains(&self, c: &Coordinate) -> bool {
        self.contains_lon(c.lon) && self.contains_lat(c.lat)
    }

    pub fn contains_lon(&self, lon: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon
    }

    pub fn contains_lat(&self, lat: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat
    }
}
