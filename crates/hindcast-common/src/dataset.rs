//! Dataset selectors: which product of the archive a request reads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HindcastError;

/// Dataset type. Wave data comes from the gridded product, wind data from
/// the spectral (station) product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Wave,
    Wind,
}

impl DatasetKind {
    /// Minimum variable set always fetched for this dataset type, in output
    /// column order.
    pub fn core_variables(&self) -> &'static [&'static str] {
        match self {
            DatasetKind::Wave => &["t02", "hs", "dir"],
            DatasetKind::Wind => &["wnd", "wnddir"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Wave => "wave",
            DatasetKind::Wind => "wind",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = HindcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wave" | "waves" | "gridded" => Ok(DatasetKind::Wave),
            "wind" | "spectral" | "spec" => Ok(DatasetKind::Wind),
            other => Err(HindcastError::InvalidRequest(format!(
                "unknown dataset type '{}'",
                other
            ))),
        }
    }
}

/// Region/resolution of the gridded wave product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "glob_24m")]
    Glob24m,
    #[serde(rename = "aus_10m")]
    Aus10m,
    #[serde(rename = "aus_4m")]
    Aus4m,
    #[serde(rename = "pac_10m")]
    Pac10m,
    #[serde(rename = "pac_4m")]
    Pac4m,
}

impl Region {
    pub const ALL: [Region; 5] = [
        Region::Glob24m,
        Region::Aus10m,
        Region::Aus4m,
        Region::Pac10m,
        Region::Pac4m,
    ];

    /// Name used in archive file names, e.g. `aus_4m`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Glob24m => "glob_24m",
            Region::Aus10m => "aus_10m",
            Region::Aus4m => "aus_4m",
            Region::Pac10m => "pac_10m",
            Region::Pac4m => "pac_4m",
        }
    }

    /// Nominal grid spacing in degrees.
    pub fn spacing_degrees(&self) -> f64 {
        match self {
            Region::Glob24m => 0.4,
            Region::Aus10m | Region::Pac10m => 1.0 / 6.0,
            Region::Aus4m | Region::Pac4m => 1.0 / 15.0,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = HindcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Region::ALL
            .into_iter()
            .find(|r| r.as_str() == wanted)
            .ok_or_else(|| HindcastError::InvalidRequest(format!("unknown region '{}'", s)))
    }
}

/// Which archive product a request reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "product", rename_all = "lowercase")]
pub enum DatasetSelector {
    /// Gridded wave fields for one region/resolution.
    Gridded { region: Region },
    /// Spectral output at fixed stations.
    Spectral,
}

impl DatasetSelector {
    /// Selector for a dataset type; the region only matters for gridded data.
    pub fn for_kind(kind: DatasetKind, region: Region) -> Self {
        match kind {
            DatasetKind::Wave => DatasetSelector::Gridded { region },
            DatasetKind::Wind => DatasetSelector::Spectral,
        }
    }

    pub fn kind(&self) -> DatasetKind {
        match self {
            DatasetSelector::Gridded { .. } => DatasetKind::Wave,
            DatasetSelector::Spectral => DatasetKind::Wind,
        }
    }

    pub fn region(&self) -> Option<Region> {
        match self {
            DatasetSelector::Gridded { region } => Some(*region),
            DatasetSelector::Spectral => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_round_trip_names() {
        for region in Region::ALL {
            assert_eq!(region.as_str().parse::<Region>().unwrap(), region);
        }
        assert!("aus_2m".parse::<Region>().is_err());
    }

    #[test]
    fn test_selector_for_kind() {
        let wave = DatasetSelector::for_kind(DatasetKind::Wave, Region::Aus4m);
        assert_eq!(wave.region(), Some(Region::Aus4m));
        let wind = DatasetSelector::for_kind(DatasetKind::Wind, Region::Aus4m);
        assert_eq!(wind, DatasetSelector::Spectral);
        assert_eq!(wind.kind(), DatasetKind::Wind);
    }

    #[test]
    fn test_core_variables() {
        assert_eq!(DatasetKind::Wave.core_variables(), &["t02", "hs", "dir"]);
        assert_eq!(DatasetKind::Wind.core_variables(), &["wnd", "wnddir"]);
    }
}
