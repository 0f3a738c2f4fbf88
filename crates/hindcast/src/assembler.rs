//! Concatenates monthly records into one table.
//!
//! Two strategies share the same output: in-memory loads every record first
//! and then concatenates into pre-reserved buffers; streamed reads only the
//! needed columns of one month at a time and appends directly. [`assemble`]
//! tries in-memory first and retries streamed when in-memory runs out of
//! memory (allocation failure or over the configured budget).
//!
//! [`assemble`]: DatasetAssembler::assemble

use std::collections::TryReserveError;
use thiserror::Error;
use tracing::{debug, warn};

use hindcast_common::{
    AssembledDataset, ColumnLayout, HindcastError, MonthlyRecord, VariableName, YearMonth,
};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("in-memory assembly needs {needed} bytes, over the budget of {budget}")]
    OverBudget { needed: usize, budget: usize },

    #[error("allocation of {rows} rows failed: {source}")]
    Allocation {
        rows: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("month {month} could not be read: {message}")]
    Source { month: YearMonth, message: String },

    #[error("no month produced any rows")]
    Empty,
}

impl AssemblyError {
    /// Failures that the streamed strategy may recover from.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            AssemblyError::OverBudget { .. } | AssemblyError::Allocation { .. }
        )
    }
}

impl From<AssemblyError> for HindcastError {
    fn from(e: AssemblyError) -> Self {
        HindcastError::Assembly(e.to_string())
    }
}

/// Where assembled months are read from. `Ok(None)` means the month has no
/// data (it failed to fetch) and becomes a gap.
pub trait MonthlySource {
    fn load(&self, month: YearMonth) -> Result<Option<MonthlyRecord>, AssemblyError>;

    /// Load with only `names` materialised. Records may carry fewer columns;
    /// absent ones are filled with NaN by the assembler.
    fn load_columns(
        &self,
        month: YearMonth,
        _names: &[VariableName],
    ) -> Result<Option<MonthlyRecord>, AssemblyError> {
        self.load(month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStrategy {
    InMemory,
    Streamed,
}

pub struct DatasetAssembler<'a> {
    layout: &'a ColumnLayout,
    memory_budget: usize,
}

impl<'a> DatasetAssembler<'a> {
    pub fn new(layout: &'a ColumnLayout, memory_budget: usize) -> Self {
        Self {
            layout,
            memory_budget,
        }
    }

    /// In-memory with streamed fallback. Returns the strategy that produced
    /// the dataset.
    pub fn assemble(
        &self,
        months: &[YearMonth],
        source: &dyn MonthlySource,
    ) -> Result<(AssembledDataset, AssemblyStrategy), AssemblyError> {
        match self.assemble_in_memory(months, source) {
            Ok(dataset) => Ok((dataset, AssemblyStrategy::InMemory)),
            Err(e) if e.is_out_of_memory() => {
                warn!(error = %e, "In-memory assembly out of memory, retrying streamed");
                let dataset = self.assemble_streamed(months, source)?;
                Ok((dataset, AssemblyStrategy::Streamed))
            }
            Err(e) => Err(e),
        }
    }

    pub fn assemble_in_memory(
        &self,
        months: &[YearMonth],
        source: &dyn MonthlySource,
    ) -> Result<AssembledDataset, AssemblyError> {
        let mut out = AssembledDataset::with_layout(self.layout);
        let mut records = Vec::with_capacity(months.len());
        let mut loaded_bytes = 0usize;

        for &month in months {
            match source.load(month)? {
                Some(record) if record.rows() > 0 => {
                    loaded_bytes = loaded_bytes.saturating_add(record.estimated_bytes());
                    if loaded_bytes > self.memory_budget {
                        return Err(AssemblyError::OverBudget {
                            needed: loaded_bytes,
                            budget: self.memory_budget,
                        });
                    }
                    records.push(record);
                }
                _ => out.missing_months.push(month),
            }
        }

        let total_rows: usize = records.iter().map(MonthlyRecord::rows).sum();
        reserve(&mut out, total_rows)?;
        for record in &records {
            self.append(&mut out, record);
        }

        finish(out, "in-memory")
    }

    pub fn assemble_streamed(
        &self,
        months: &[YearMonth],
        source: &dyn MonthlySource,
    ) -> Result<AssembledDataset, AssemblyError> {
        let mut out = AssembledDataset::with_layout(self.layout);
        for &month in months {
            match source.load_columns(month, self.layout.columns())? {
                Some(record) if record.rows() > 0 => {
                    reserve(&mut out, record.rows())?;
                    self.append(&mut out, &record);
                }
                _ => out.missing_months.push(month),
            }
        }
        finish(out, "streamed")
    }

    /// Capacity must already be reserved.
    fn append(&self, out: &mut AssembledDataset, record: &MonthlyRecord) {
        out.time.extend_from_slice(record.time());
        for (series, name) in out.columns.iter_mut().zip(self.layout.columns()) {
            series.values.extend_from_slice(&record.column_or_nan(name));
        }
        out.months_included.push(record.month());
    }
}

fn reserve(out: &mut AssembledDataset, rows: usize) -> Result<(), AssemblyError> {
    let err = |source| AssemblyError::Allocation { rows, source };
    out.time.try_reserve_exact(rows).map_err(err)?;
    for series in &mut out.columns {
        series.values.try_reserve_exact(rows).map_err(err)?;
    }
    Ok(())
}

fn finish(out: AssembledDataset, strategy: &str) -> Result<AssembledDataset, AssemblyError> {
    if out.is_empty() {
        return Err(AssemblyError::Empty);
    }
    debug!(
        strategy,
        rows = out.rows(),
        months = out.months_included.len(),
        missing = out.missing_months.len(),
        "Assembled dataset"
    );
    Ok(out)
}
