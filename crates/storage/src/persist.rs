//! Writes an assembled dataset to disk as a CSV table plus a JSON metadata
//! record.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use chrono::SecondsFormat;
use hindcast_common::{AssembledDataset, DatasetMetadata};

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to encode metadata {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("refusing to persist an empty dataset")]
    Empty,
}

/// Locations of the files written by [`DatasetPersister::persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedPaths {
    pub table: PathBuf,
    pub metadata: PathBuf,
}

/// Writes datasets under one output directory.
#[derive(Debug, Clone)]
pub struct DatasetPersister {
    output_dir: PathBuf,
}

impl DatasetPersister {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Paths a dataset with this metadata is written to.
    pub fn paths_for(&self, metadata: &DatasetMetadata) -> PersistedPaths {
        let stem = metadata.file_stem();
        PersistedPaths {
            table: self.output_dir.join(format!("{}.csv", stem)),
            metadata: self.output_dir.join(format!("{}.json", stem)),
        }
    }

    /// Write both files, replacing earlier output for the same request.
    pub fn persist(
        &self,
        dataset: &AssembledDataset,
        metadata: &DatasetMetadata,
    ) -> PersistResult<PersistedPaths> {
        if dataset.is_empty() {
            return Err(PersistError::Empty);
        }
        fs::create_dir_all(&self.output_dir).map_err(|e| PersistError::Io {
            path: self.output_dir.clone(),
            source: e,
        })?;

        let paths = self.paths_for(metadata);
        write_atomic(&paths.table, |w| write_table(dataset, w, &paths.table))?;
        write_atomic(&paths.metadata, |w| {
            serde_json::to_writer_pretty(&mut *w, metadata).map_err(|e| PersistError::Json {
                path: paths.metadata.clone(),
                source: e,
            })
        })?;

        info!(
            table = %paths.table.display(),
            rows = dataset.rows(),
            columns = dataset.columns.len(),
            "Persisted dataset"
        );
        Ok(paths)
    }
}

/// Header `time,<columns...>`, one row per instant. Time is RFC 3339 UTC,
/// NaN is written as `NaN`.
fn write_table<W: Write>(dataset: &AssembledDataset, out: W, path: &Path) -> PersistResult<()> {
    let csv_err = |e: csv::Error| PersistError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    let mut writer = csv::Writer::from_writer(out);
    let mut header = Vec::with_capacity(dataset.columns.len() + 1);
    header.push("time".to_string());
    header.extend(dataset.column_names().map(|n| n.to_string()));
    writer.write_record(&header).map_err(csv_err)?;

    let mut row = Vec::with_capacity(header.len());
    for (i, t) in dataset.time.iter().enumerate() {
        row.clear();
        row.push(t.to_rfc3339_opts(SecondsFormat::Secs, true));
        for series in &dataset.columns {
            row.push(format_value(series.values[i]));
        }
        writer.write_record(&row).map_err(csv_err)?;
    }
    writer.flush().map_err(|e| PersistError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else {
        v.to_string()
    }
}

/// Write through a temp file in the destination directory, then rename.
fn write_atomic<F>(path: &Path, write: F) -> PersistResult<()>
where
    F: FnOnce(&mut BufWriter<&fs::File>) -> PersistResult<()>,
{
    let io_err = |e: io::Error| PersistError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        write(&mut writer)?;
        writer.flush().map_err(io_err)?;
    }
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use hindcast_common::{
        ColumnLayout, Coordinate, DatasetKind, DatasetSelector, GridIndex, LocationResolution,
        Region, YearMonth,
    };
    use tempfile::TempDir;

    fn sample() -> (AssembledDataset, DatasetMetadata) {
        let layout = ColumnLayout::for_request(DatasetKind::Wave, &[]);
        let mut dataset = AssembledDataset::with_layout(&layout);
        let start = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        dataset.time = (0..3).map(|h| start + Duration::hours(h)).collect();
        dataset.columns[0].values = vec![5.0, 5.5, 6.0];
        dataset.columns[1].values = vec![1.25, f64::NAN, 1.5];
        dataset.columns[2].values = vec![180.0, 185.0, 190.0];
        let month = YearMonth::new(2015, 1).unwrap();
        dataset.months_included = vec![month];

        let resolution = LocationResolution::new(
            Coordinate::new(145.1768, -40.026),
            Coordinate::new(145.2, -40.0),
            GridIndex::Cell { lat_index: 0, lon_index: 0 },
            DatasetSelector::Gridded { region: Region::Aus4m },
            None,
        );
        let metadata = DatasetMetadata::describe(&resolution, month, month, &layout, &dataset, "t");
        (dataset, metadata)
    }

    #[test]
    fn test_persist_writes_table_and_metadata() {
        let dir = TempDir::new().unwrap();
        let persister = DatasetPersister::new(dir.path().join("out"));
        let (dataset, metadata) = sample();

        let paths = persister.persist(&dataset, &metadata).unwrap();
        assert!(paths
            .table
            .ends_with("145.200E_40.000S_wave_aus_4m_201501_201501.csv"));

        let mut reader = csv::Reader::from_path(&paths.table).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["time", "t02", "hs", "dir"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "2015-01-01T00:00:00Z");
        assert_eq!(&rows[1][2], "NaN");
        assert_eq!(&rows[2][3], "190");

        let json = fs::read_to_string(&paths.metadata).unwrap();
        let back: DatasetMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.identifier, metadata.identifier);
        assert_eq!(back.rows, 3);
    }

    #[test]
    fn test_persist_overwrites() {
        let dir = TempDir::new().unwrap();
        let persister = DatasetPersister::new(dir.path());
        let (mut dataset, metadata) = sample();
        persister.persist(&dataset, &metadata).unwrap();

        dataset.time.truncate(1);
        for c in &mut dataset.columns {
            c.values.truncate(1);
        }
        let paths = persister.persist(&dataset, &metadata).unwrap();
        let reader = csv::Reader::from_path(&paths.table).unwrap();
        assert_eq!(reader.into_records().count(), 1);
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let dir = TempDir::new().unwrap();
        let persister = DatasetPersister::new(dir.path());
        let (mut dataset, metadata) = sample();
        dataset.time.clear();
        assert!(matches!(
            persister.persist(&dataset, &metadata),
            Err(PersistError::Empty)
        ));
    }
}
