//! Common types shared across the hindcast retrieval crates.
//!
//! Everything that crosses a crate boundary lives here: coordinates and
//! search boxes, year-month periods, dataset selectors, the variable/record
//! model, CF time-unit decoding, and the traits the upstream archive is
//! accessed through.

pub mod archive;
pub mod assembled;
pub mod coord;
pub mod dataset;
pub mod error;
pub mod location;
pub mod period;
pub mod time;
pub mod variables;

pub use archive::{ArchiveError, GridIndex, HindcastArchive, MonthFile};
pub use assembled::{AssembledDataset, DatasetMetadata};
pub use coord::{normalize_lon, Coordinate, SearchBox, EARTH_RADIUS_KM};
pub use dataset::{DatasetKind, DatasetSelector, Region};
pub use error::{HindcastError, HindcastResult};
pub use location::LocationResolution;
pub use period::{month_range, PeriodParseError, YearMonth};
pub use time::{TimeParseError, TimeUnits};
pub use variables::{ColumnLayout, MonthlyRecord, RecordError, Series, VariableName, VariableSet};
