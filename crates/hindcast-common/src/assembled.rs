//! Assembled point dataset and its metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::Coordinate;
use crate::dataset::{DatasetKind, Region};
use crate::location::LocationResolution;
use crate::period::YearMonth;
use crate::variables::{ColumnLayout, Series, VariableName};

/// Months concatenated in ascending order into one table.
///
/// Every column has exactly `time.len()` samples. Months that yielded no rows
/// are listed in `missing_months`; the table itself carries no gap markers.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledDataset {
    pub time: Vec<DateTime<Utc>>,
    pub columns: Vec<Series>,
    pub months_included: Vec<YearMonth>,
    pub missing_months: Vec<YearMonth>,
}

impl AssembledDataset {
    /// Empty table with one empty column per layout entry.
    pub fn with_layout(layout: &ColumnLayout) -> Self {
        Self {
            time: Vec::new(),
            columns: layout
                .columns()
                .iter()
                .map(|name| Series::new(name.clone(), Vec::new()))
                .collect(),
            months_included: Vec::new(),
            missing_months: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &VariableName> {
        self.columns.iter().map(|s| &s.name)
    }

    pub fn column(&self, name: &VariableName) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|s| &s.name == name)
            .map(|s| s.values.as_slice())
    }
}

/// Descriptive record persisted next to the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub identifier: String,
    pub kind: DatasetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    pub target: Coordinate,
    pub resolved: Coordinate,
    pub offset_km: f64,
    pub start: YearMonth,
    pub end: YearMonth,
    pub variables: Vec<VariableName>,
    pub extra_variables: Vec<VariableName>,
    pub rows: usize,
    pub months_included: Vec<YearMonth>,
    pub missing_months: Vec<YearMonth>,
    pub source_template: String,
    pub created_at: DateTime<Utc>,
    pub generator: String,
}

impl DatasetMetadata {
    pub fn describe(
        resolution: &LocationResolution,
        start: YearMonth,
        end: YearMonth,
        layout: &ColumnLayout,
        dataset: &AssembledDataset,
        source_template: impl Into<String>,
    ) -> Self {
        let selector = resolution.selector();
        Self {
            identifier: resolution.identifier(),
            kind: selector.kind(),
            region: selector.region(),
            station_id: selector
                .region()
                .is_none()
                .then(|| resolution.source_label()),
            target: resolution.requested(),
            resolved: resolution.resolved(),
            offset_km: resolution.offset_km(),
            start,
            end,
            variables: layout.columns().to_vec(),
            extra_variables: layout.extras().to_vec(),
            rows: dataset.rows(),
            months_included: dataset.months_included.clone(),
            missing_months: dataset.missing_months.clone(),
            source_template: source_template.into(),
            created_at: Utc::now(),
            generator: format!("hindcast {}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Region name or station id.
    pub fn source_label(&self) -> String {
        match (&self.region, &self.station_id) {
            (Some(region), _) => region.as_str().to_string(),
            (None, Some(station)) => station.clone(),
            (None, None) => "spec".to_string(),
        }
    }

    /// `{identifier}_{type}_{region|station}_{start}_{end}`, shared by the
    /// table and metadata file names.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.identifier,
            self.kind,
            self.source_label(),
            self.start,
            self.end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::GridIndex;
    use crate::dataset::DatasetSelector;

    #[test]
    fn test_metadata_file_stem() {
        let resolution = LocationResolution::new(
            Coordinate::new(145.1768, -40.026),
            Coordinate::new(145.2, -40.0),
            GridIndex::Cell { lat_index: 3, lon_index: 4 },
            DatasetSelector::Gridded { region: Region::Aus4m },
            None,
        );
        let layout = ColumnLayout::for_request(DatasetKind::Wave, &["fp".into()]);
        let dataset = AssembledDataset::with_layout(&layout);
        let start = YearMonth::new(2015, 1).unwrap();
        let end = YearMonth::new(2015, 3).unwrap();

        let meta = DatasetMetadata::describe(&resolution, start, end, &layout, &dataset, "tmpl");
        assert_eq!(meta.file_stem(), "145.200E_40.000S_wave_aus_4m_201501_201503");
        assert_eq!(meta.extra_variables, vec![VariableName::new("fp")]);
        assert_eq!(meta.variables.len(), 4);
        assert!(meta.station_id.is_none());
    }

    #[test]
    fn test_with_layout_columns() {
        let layout = ColumnLayout::for_request(DatasetKind::Wind, &[]);
        let dataset = AssembledDataset::with_layout(&layout);
        let names: Vec<&str> = dataset.column_names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["wnd", "wnddir"]);
        assert!(dataset.is_empty());
    }
}
