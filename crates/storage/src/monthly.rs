//! On-disk cache of monthly point records.
//!
//! One gzip-compressed JSON file per (dataset type, region or station,
//! resolved location, month):
//!
//! ```text
//! {root}/wave/aus_4m/145.2000E_-40.0000N/201501.json.gz
//! ```
//!
//! Writes go to a temporary sibling which is then renamed over the final path,
//! so concurrent workers storing different months never observe partial files
//! and a crashed run leaves at most a stray temp file behind.

use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserializer, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use hindcast_common::{
    DatasetKind, LocationResolution, MonthlyRecord, VariableName, VariableSet, YearMonth,
};

/// Version written into every entry; entries with another version are treated
/// as corrupt and re-fetched.
pub const CACHE_FORMAT_VERSION: u32 = 1;

const ENTRY_SUFFIX: &str = ".json.gz";

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache entry {path} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("cache entry {path} has unsupported format version {found}")]
    Version { path: PathBuf, found: u32 },

    #[error("failed to encode cache entry {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, message: impl ToString) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    /// True when the entry exists but cannot be used; the caller should
    /// discard it and fetch the month again.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheError::Corrupt { .. } | CacheError::Version { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Identity of one cached month.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: DatasetKind,
    /// Region name or station id
    pub source: String,
    /// Resolved coordinate token
    pub location: String,
    pub month: YearMonth,
}

impl CacheKey {
    pub fn for_month(resolution: &LocationResolution, month: YearMonth) -> Self {
        Self {
            kind: resolution.selector().kind(),
            source: resolution.source_label(),
            location: resolution.resolved().storage_token(),
            month,
        }
    }

    fn location_dir(&self) -> PathBuf {
        PathBuf::from(self.kind.as_str())
            .join(&self.source)
            .join(&self.location)
    }

    /// Path relative to the cache root.
    pub fn relative_path(&self) -> PathBuf {
        self.location_dir()
            .join(format!("{}{}", self.month, ENTRY_SUFFIX))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.kind, self.source, self.location, self.month
        )
    }
}

/// Entry counts for [`MonthlyCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

impl CacheStats {
    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Serialize)]
struct EntryOut<'a> {
    format_version: u32,
    month: YearMonth,
    /// Milliseconds since the Unix epoch
    time: Vec<i64>,
    variables: Vec<SeriesOut<'a>>,
}

#[derive(Serialize)]
struct SeriesOut<'a> {
    name: &'a VariableName,
    /// NaN is written as null
    values: Vec<Option<f64>>,
}

/// Directory-backed monthly cache. Cheap to clone; holds only the root path.
#[derive(Debug, Clone)]
pub struct MonthlyCache {
    root: PathBuf,
}

impl MonthlyCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Whether an entry exists and holds every named variable. An unreadable
    /// entry counts as absent.
    pub fn has_columns(&self, key: &CacheKey, names: &[VariableName]) -> bool {
        if !self.has(key) {
            return false;
        }
        match self.load_columns(key, names) {
            Ok(record) => {
                let missing: Vec<&str> = names
                    .iter()
                    .filter(|name| !record.variables().contains(name))
                    .map(|name| name.as_str())
                    .collect();
                if !missing.is_empty() {
                    debug!(key = %key, ?missing, "Cache entry lacks requested variables");
                }
                missing.is_empty()
            }
            Err(e) if e.is_corrupt() => {
                warn!(key = %key, error = %e, "Corrupt cache entry, will refetch");
                false
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Cache entry unreadable");
                false
            }
        }
    }

    /// Load a full record.
    pub fn load(&self, key: &CacheKey) -> CacheResult<MonthlyRecord> {
        self.read_entry(key, None)
    }

    /// Load only the named variables of a record. Other variables are skipped
    /// while decoding and never materialised.
    pub fn load_columns(&self, key: &CacheKey, names: &[VariableName]) -> CacheResult<MonthlyRecord> {
        self.read_entry(key, Some(names))
    }

    fn read_entry(&self, key: &CacheKey, wanted: Option<&[VariableName]>) -> CacheResult<MonthlyRecord> {
        let path = self.path_for(key);
        let file = File::open(&path).map_err(|e| CacheError::io(&path, e))?;
        let reader = GzDecoder::new(BufReader::new(file));

        let mut de = serde_json::Deserializer::from_reader(reader);
        let entry = EntrySeed { wanted }
            .deserialize(&mut de)
            .map_err(|e| CacheError::corrupt(&path, e))?;
        de.end().map_err(|e| CacheError::corrupt(&path, e))?;

        if entry.format_version != CACHE_FORMAT_VERSION {
            return Err(CacheError::Version {
                path,
                found: entry.format_version,
            });
        }
        if entry.month != key.month {
            return Err(CacheError::corrupt(
                &path,
                format!("entry holds month {} instead of {}", entry.month, key.month),
            ));
        }

        let time = entry
            .time
            .iter()
            .map(|ms| {
                Utc.timestamp_millis_opt(*ms)
                    .single()
                    .ok_or_else(|| CacheError::corrupt(&path, format!("invalid timestamp {}", ms)))
            })
            .collect::<CacheResult<Vec<DateTime<Utc>>>>()?;

        MonthlyRecord::new(entry.month, time, entry.variables).map_err(|e| CacheError::corrupt(&path, e))
    }

    /// Write a record, replacing any existing entry for the key.
    pub fn store(&self, key: &CacheKey, record: &MonthlyRecord) -> CacheResult<u64> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let entry = EntryOut {
            format_version: CACHE_FORMAT_VERSION,
            month: record.month(),
            time: record.time().iter().map(|t| t.timestamp_millis()).collect(),
            variables: record
                .variables()
                .iter()
                .map(|s| SeriesOut {
                    name: &s.name,
                    values: s
                        .values
                        .iter()
                        .map(|v| if v.is_finite() { Some(*v) } else { None })
                        .collect(),
                })
                .collect(),
        };

        let tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .suffix(ENTRY_SUFFIX)
            .tempfile_in(&dir)
            .map_err(|e| CacheError::io(&dir, e))?;
        {
            let mut encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
            serde_json::to_writer(&mut encoder, &entry).map_err(|e| CacheError::Encode {
                path: path.clone(),
                message: e.to_string(),
            })?;
            let mut inner = encoder.finish().map_err(|e| CacheError::io(&path, e))?;
            inner.flush().map_err(|e| CacheError::io(&path, e))?;
        }
        let file = tmp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        debug!(key = %key, bytes = size, "Stored monthly cache entry");
        Ok(size)
    }

    /// Remove one entry. Returns whether a file was removed.
    pub fn remove(&self, key: &CacheKey) -> CacheResult<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Remove every month cached for the location `key` belongs to (the month
    /// component of `key` is ignored). Returns the number of entries removed.
    pub fn purge_location(&self, key: &CacheKey) -> CacheResult<usize> {
        let dir = self.root.join(key.location_dir());
        if !dir.is_dir() {
            return Ok(0);
        }
        let removed = self.count_entries(&dir).entries;
        fs::remove_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        debug!(location = %key.location, removed, "Purged cached months");
        Ok(removed)
    }

    /// Walk the cache tree counting entries and bytes.
    pub fn stats(&self) -> CacheStats {
        self.count_entries(&self.root)
    }

    fn count_entries(&self, dir: &Path) -> CacheStats {
        let mut stats = CacheStats::default();
        for entry in walkdir::WalkDir::new(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable cache path");
                    continue;
                }
            };
            let is_entry = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.ends_with(ENTRY_SUFFIX) && !n.starts_with(".partial-"));
            if is_entry {
                stats.entries += 1;
                stats.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Selective decoding
// ---------------------------------------------------------------------------

struct EntryIn {
    format_version: u32,
    month: YearMonth,
    time: Vec<i64>,
    variables: VariableSet,
}

/// Decodes an entry, keeping only `wanted` variables (all when None).
struct EntrySeed<'a> {
    wanted: Option<&'a [VariableName]>,
}

impl<'a> EntrySeed<'a> {
    fn keeps(&self, name: &VariableName) -> bool {
        self.wanted.map_or(true, |w| w.contains(name))
    }
}

impl<'de, 'a> DeserializeSeed<'de> for EntrySeed<'a> {
    type Value = EntryIn;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'a> Visitor<'de> for EntrySeed<'a> {
    type Value = EntryIn;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a monthly cache entry")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut format_version = None;
        let mut month = None;
        let mut time = None;
        let mut variables = None;

        while let Some(field) = map.next_key::<String>()? {
            match field.as_str() {
                "format_version" => format_version = Some(map.next_value()?),
                "month" => month = Some(map.next_value()?),
                "time" => time = Some(map.next_value()?),
                "variables" => variables = Some(map.next_value_seed(VariablesSeed { entry: &self })?),
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(EntryIn {
            format_version: format_version.ok_or_else(|| de::Error::missing_field("format_version"))?,
            month: month.ok_or_else(|| de::Error::missing_field("month"))?,
            time: time.ok_or_else(|| de::Error::missing_field("time"))?,
            variables: variables.ok_or_else(|| de::Error::missing_field("variables"))?,
        })
    }
}

struct VariablesSeed<'s, 'a> {
    entry: &'s EntrySeed<'a>,
}

impl<'de, 's, 'a> DeserializeSeed<'de> for VariablesSeed<'s, 'a> {
    type Value = VariableSet;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, 's, 'a> Visitor<'de> for VariablesSeed<'s, 'a> {
    type Value = VariableSet;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a list of variable series")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut set = VariableSet::new();
        while let Some(series) = seq.next_element_seed(SeriesSeed { entry: self.entry })? {
            if let Some((name, values)) = series {
                set.insert(name, values);
            }
        }
        Ok(set)
    }
}

struct SeriesSeed<'s, 'a> {
    entry: &'s EntrySeed<'a>,
}

impl<'de, 's, 'a> DeserializeSeed<'de> for SeriesSeed<'s, 'a> {
    type Value = Option<(VariableName, Vec<f64>)>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 's, 'a> Visitor<'de> for SeriesSeed<'s, 'a> {
    type Value = Option<(VariableName, Vec<f64>)>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a variable series")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut name: Option<VariableName> = None;
        let mut values: Option<Vec<f64>> = None;
        let mut skipped = false;

        while let Some(field) = map.next_key::<String>()? {
            match field.as_str() {
                "name" => name = Some(map.next_value()?),
                // `name` is written first, so unwanted values can be skipped
                // without allocating
                "values" => match &name {
                    Some(n) if !self.entry.keeps(n) => {
                        map.next_value::<IgnoredAny>()?;
                        skipped = true;
                    }
                    _ => values = Some(decode_values(map.next_value()?)),
                },
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        let name = name.ok_or_else(|| de::Error::missing_field("name"))?;
        if skipped || !self.entry.keeps(&name) {
            return Ok(None);
        }
        let values = values.ok_or_else(|| de::Error::missing_field("values"))?;
        Ok(Some((name, values)))
    }
}

fn decode_values(raw: Vec<Option<f64>>) -> Vec<f64> {
    raw.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}
