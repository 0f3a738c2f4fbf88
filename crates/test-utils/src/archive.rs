//! In-memory archive standing in for the remote monthly files.
//!
//! A [`SyntheticArchive`] serves one file per month on a small regular
//! grid (plus optional stations). The month is taken from the first six-digit
//! run in the URL, so any URL template that embeds `{yyyymm}` works. Months
//! can be made to fail or to respond slowly, and every `open` is counted.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use hindcast_common::{ArchiveError, Coordinate, GridIndex, HindcastArchive, MonthFile, YearMonth};

use crate::generators::{hourly_month, synthetic_value};

#[derive(Debug, Clone)]
struct GridData {
    lats: Vec<f64>,
    lons: Vec<f64>,
    variables: Vec<String>,
    land: HashSet<(usize, usize)>,
    stations: Vec<Coordinate>,
    truncated: HashMap<String, usize>,
}

impl GridData {
    /// 1-based code of a variable, used by [`synthetic_value`].
    fn code(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == variable).map(|i| i + 1)
    }
}

pub struct SyntheticArchive {
    grid: Arc<GridData>,
    failing: HashSet<YearMonth>,
    delays: HashMap<YearMonth, Duration>,
    opens: Mutex<HashMap<YearMonth, usize>>,
}

impl SyntheticArchive {
    /// Gridded archive on the given axes with the named variables present.
    pub fn new(lats: Vec<f64>, lons: Vec<f64>, variables: &[&str]) -> Self {
        Self {
            grid: Arc::new(GridData {
                lats,
                lons,
                variables: variables.iter().map(|v| v.to_string()).collect(),
                land: HashSet::new(),
                stations: Vec::new(),
                truncated: HashMap::new(),
            }),
            failing: HashSet::new(),
            delays: HashMap::new(),
            opens: Mutex::new(HashMap::new()),
        }
    }

    fn grid_mut(&mut self) -> &mut GridData {
        Arc::make_mut(&mut self.grid)
    }

    /// Mark a cell as land: every variable reads as NaN there.
    pub fn with_land(mut self, lat_index: usize, lon_index: usize) -> Self {
        self.grid_mut().land.insert((lat_index, lon_index));
        self
    }

    /// Station positions for spectral files. Station `i` reads the series
    /// of cell `(i, 0)`.
    pub fn with_stations(mut self, stations: Vec<Coordinate>) -> Self {
        self.grid_mut().stations = stations;
        self
    }

    /// Every open of this month fails.
    pub fn with_failing_month(mut self, month: YearMonth) -> Self {
        self.failing.insert(month);
        self
    }

    /// Opens of this month sleep first.
    pub fn with_delay(mut self, month: YearMonth, delay: Duration) -> Self {
        self.delays.insert(month, delay);
        self
    }

    /// Point series of `variable` come back with only `len` samples.
    pub fn with_truncated(mut self, variable: &str, len: usize) -> Self {
        self.grid_mut().truncated.insert(variable.to_string(), len);
        self
    }

    pub fn lats(&self) -> &[f64] {
        &self.grid.lats
    }

    pub fn lons(&self) -> &[f64] {
        &self.grid.lons
    }

    /// Code passed to [`synthetic_value`] for `variable`, if present.
    pub fn variable_code(&self, variable: &str) -> Option<usize> {
        self.grid.code(variable)
    }

    /// Total opens across all months, failed ones included.
    pub fn opens(&self) -> usize {
        self.opens_by_month().values().sum()
    }

    pub fn opens_for(&self, month: YearMonth) -> usize {
        self.opens_by_month().get(&month).copied().unwrap_or(0)
    }

    pub fn reset_opens(&self) {
        if let Ok(mut opens) = self.opens.lock() {
            opens.clear();
        }
    }

    fn opens_by_month(&self) -> HashMap<YearMonth, usize> {
        self.opens.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl HindcastArchive for SyntheticArchive {
    fn open(&self, url: &str) -> Result<Box<dyn MonthFile>, ArchiveError> {
        let month = month_in_url(url).ok_or_else(|| ArchiveError::Open {
            url: url.to_string(),
            message: "no yyyymm in url".to_string(),
        })?;
        if let Ok(mut opens) = self.opens.lock() {
            *opens.entry(month).or_insert(0) += 1;
        }
        if let Some(delay) = self.delays.get(&month) {
            thread::sleep(*delay);
        }
        if self.failing.contains(&month) {
            return Err(ArchiveError::Open {
                url: url.to_string(),
                message: "file not found".to_string(),
            });
        }
        Ok(Box::new(SyntheticFile {
            grid: Arc::clone(&self.grid),
            month,
        }))
    }
}

/// First run of exactly six digits that parses as a year-month.
pub fn month_in_url(url: &str) -> Option<YearMonth> {
    url.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 6)
        .find_map(|run| run.parse::<YearMonth>().ok())
}

struct SyntheticFile {
    grid: Arc<GridData>,
    month: YearMonth,
}

impl SyntheticFile {
    fn cell_series(&self, code: usize, lat_index: usize, lon_index: usize) -> Vec<f64> {
        let steps = hourly_month(self.month).len();
        if self.grid.land.contains(&(lat_index, lon_index)) {
            return vec![f64::NAN; steps];
        }
        (0..steps)
            .map(|step| synthetic_value(code, self.month, step, lat_index, lon_index))
            .collect()
    }
}

impl MonthFile for SyntheticFile {
    fn time_axis(&self) -> Result<Vec<DateTime<Utc>>, ArchiveError> {
        Ok(hourly_month(self.month))
    }

    fn axis(&self, name: &str) -> Result<Vec<f64>, ArchiveError> {
        match name {
            "latitude" | "lat" => Ok(self.grid.lats.clone()),
            "longitude" | "lon" => Ok(self.grid.lons.clone()),
            _ => Err(ArchiveError::MissingVariable(name.to_string())),
        }
    }

    fn read_point_series(&self, variable: &str, index: GridIndex) -> Result<Vec<f64>, ArchiveError> {
        let code = self
            .grid
            .code(variable)
            .ok_or_else(|| ArchiveError::MissingVariable(variable.to_string()))?;
        let (lat_index, lon_index) = match index {
            GridIndex::Cell { lat_index, lon_index } => (lat_index, lon_index),
            GridIndex::Station { index } if index < self.grid.stations.len() => (index, 0),
            GridIndex::Station { index } => {
                return Err(ArchiveError::layout(variable, format!("station {} out of range", index)))
            }
        };
        if lat_index >= self.grid.lats.len() || lon_index >= self.grid.lons.len() {
            return Err(ArchiveError::layout(variable, "cell out of range"));
        }

        let mut series = self.cell_series(code, lat_index, lon_index);
        if let Some(&len) = self.grid.truncated.get(variable) {
            series.truncate(len);
        }
        Ok(series)
    }

    fn read_first_step(
        &self,
        variable: &str,
        lat: Range<usize>,
        lon: Range<usize>,
    ) -> Result<Vec<f64>, ArchiveError> {
        let code = self
            .grid
            .code(variable)
            .ok_or_else(|| ArchiveError::MissingVariable(variable.to_string()))?;
        if lat.end > self.grid.lats.len() || lon.end > self.grid.lons.len() {
            return Err(ArchiveError::layout(variable, "block out of range"));
        }
        let mut block = Vec::with_capacity(lat.len() * lon.len());
        for j in lat {
            for i in lon.clone() {
                if self.grid.land.contains(&(j, i)) {
                    block.push(f64::NAN);
                } else {
                    block.push(synthetic_value(code, self.month, 0, j, i));
                }
            }
        }
        Ok(block)
    }

    fn station_coordinates(&self) -> Result<Vec<Coordinate>, ArchiveError> {
        Ok(self.grid.stations.clone())
    }
}
