//! Variable and record model.
//!
//! A [`VariableSet`] always carries one series per requested variable; a
//! variable the source could not provide is a NaN-filled series of the right
//! length, never a missing key. [`MonthlyRecord::new`] enforces that every
//! series matches the length of the time vector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use crate::dataset::DatasetKind;
use crate::period::YearMonth;

/// Variable name as it appears in the archive files (trimmed, case kept).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableName(String);

impl VariableName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VariableName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One named numeric series.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: VariableName,
    pub values: Vec<f64>,
}

impl Series {
    pub fn new(name: VariableName, values: Vec<f64>) -> Self {
        Self { name, values }
    }

    /// NaN-filled series of `len` samples.
    pub fn nan(name: VariableName, len: usize) -> Self {
        Self {
            name,
            values: vec![f64::NAN; len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered mapping from variable name to series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSet {
    series: Vec<Series>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a series, keeping first-insertion order.
    pub fn insert(&mut self, name: VariableName, values: Vec<f64>) {
        match self.series.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.values = values,
            None => self.series.push(Series::new(name, values)),
        }
    }

    pub fn get(&self, name: &VariableName) -> Option<&[f64]> {
        self.series
            .iter()
            .find(|s| &s.name == name)
            .map(|s| s.values.as_slice())
    }

    pub fn contains(&self, name: &VariableName) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &VariableName> {
        self.series.iter().map(|s| &s.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Series> {
        self.series.iter()
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl FromIterator<Series> for VariableSet {
    fn from_iter<I: IntoIterator<Item = Series>>(iter: I) -> Self {
        let mut set = VariableSet::new();
        for s in iter {
            set.insert(s.name, s.values);
        }
        set
    }
}

/// Record construction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecordError {
    #[error("variable '{name}' has {actual} samples but the time axis has {expected}")]
    LengthMismatch {
        name: VariableName,
        expected: usize,
        actual: usize,
    },
}

/// One month of point data: a time vector plus one series per variable.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyRecord {
    month: YearMonth,
    time: Vec<DateTime<Utc>>,
    variables: VariableSet,
}

impl MonthlyRecord {
    /// Build a record, checking every series against the time vector length.
    pub fn new(
        month: YearMonth,
        time: Vec<DateTime<Utc>>,
        variables: VariableSet,
    ) -> Result<Self, RecordError> {
        for series in variables.iter() {
            if series.len() != time.len() {
                return Err(RecordError::LengthMismatch {
                    name: series.name.clone(),
                    expected: time.len(),
                    actual: series.len(),
                });
            }
        }
        Ok(Self {
            month,
            time,
            variables,
        })
    }

    pub fn month(&self) -> YearMonth {
        self.month
    }

    pub fn time(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn rows(&self) -> usize {
        self.time.len()
    }

    /// The named column, or a NaN block of `rows()` samples if the record
    /// does not carry it.
    pub fn column_or_nan(&self, name: &VariableName) -> Cow<'_, [f64]> {
        match self.variables.get(name) {
            Some(values) => Cow::Borrowed(values),
            None => Cow::Owned(vec![f64::NAN; self.rows()]),
        }
    }

    /// Rough heap footprint in bytes.
    pub fn estimated_bytes(&self) -> usize {
        let time = self.time.len() * std::mem::size_of::<DateTime<Utc>>();
        let values: usize = self
            .variables
            .iter()
            .map(|s| s.len() * std::mem::size_of::<f64>())
            .sum();
        time + values
    }

    pub fn into_parts(self) -> (YearMonth, Vec<DateTime<Utc>>, VariableSet) {
        (self.month, self.time, self.variables)
    }
}

/// Output column order: core variables of the dataset type, then extras in
/// the order requested. Extras repeating a core name (or each other) are
/// dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    columns: Vec<VariableName>,
    core_count: usize,
}

impl ColumnLayout {
    pub fn for_request(kind: DatasetKind, extras: &[VariableName]) -> Self {
        let mut columns: Vec<VariableName> = kind
            .core_variables()
            .iter()
            .map(|name| VariableName::new(name))
            .collect();
        let core_count = columns.len();
        for extra in extras {
            if !columns.contains(extra) {
                columns.push(extra.clone());
            }
        }
        Self {
            columns,
            core_count,
        }
    }

    pub fn columns(&self) -> &[VariableName] {
        &self.columns
    }

    pub fn core(&self) -> &[VariableName] {
        &self.columns[..self.core_count]
    }

    pub fn extras(&self) -> &[VariableName] {
        &self.columns[self.core_count..]
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hours(n: usize) -> Vec<DateTime<Utc>> {
        let start = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|h| start + chrono::Duration::hours(h as i64))
            .collect()
    }

    #[test]
    fn test_record_rejects_length_mismatch() {
        let mut vars = VariableSet::new();
        vars.insert("hs".into(), vec![1.0, 2.0]);
        let month = YearMonth::new(2015, 1).unwrap();
        let err = MonthlyRecord::new(month, hours(3), vars).unwrap_err();
        assert!(matches!(err, RecordError::LengthMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_column_or_nan() {
        let mut vars = VariableSet::new();
        vars.insert("hs".into(), vec![1.0, 2.0, 3.0]);
        let month = YearMonth::new(2015, 1).unwrap();
        let record = MonthlyRecord::new(month, hours(3), vars).unwrap();

        assert_eq!(record.column_or_nan(&"hs".into()).as_ref(), &[1.0, 2.0, 3.0]);
        let missing = record.column_or_nan(&"fp".into());
        assert_eq!(missing.len(), 3);
        assert!(missing.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut vars = VariableSet::new();
        vars.insert("hs".into(), vec![1.0]);
        vars.insert("dir".into(), vec![2.0]);
        vars.insert("hs".into(), vec![3.0]);
        let names: Vec<&str> = vars.names().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["hs", "dir"]);
        assert_eq!(vars.get(&"hs".into()), Some(&[3.0][..]));
    }

    #[test]
    fn test_column_layout_order_and_dedup() {
        let extras = vec![VariableName::new(" fp "), "hs".into(), "t0m1".into(), "fp".into()];
        let layout = ColumnLayout::for_request(DatasetKind::Wave, &extras);
        let names: Vec<&str> = layout.columns().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["t02", "hs", "dir", "fp", "t0m1"]);
        assert_eq!(layout.core().len(), 3);
        assert_eq!(layout.extras().len(), 2);
    }

    #[test]
    fn test_variable_name_keeps_case() {
        assert_eq!(VariableName::new("  Hs_Max ").as_str(), "Hs_Max");
        assert_ne!(VariableName::new("FP"), VariableName::new("fp"));
    }
}
