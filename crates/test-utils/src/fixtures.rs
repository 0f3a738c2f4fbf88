//! Common fixtures for hindcast tests.
//!
//! The Bass Strait grid mirrors a slice of the 4 arc-minute Australian
//! region at a coarser 0.1 degree spacing, with the cell nearest the
//! reference target sitting at (145.2E, 40.0S).

use hindcast_common::{Coordinate, YearMonth};
use tempfile::TempDir;

use crate::archive::SyntheticArchive;
use crate::generators::regular_axis;

/// Requested point used throughout the pipeline tests.
pub const BASS_STRAIT_TARGET: (f64, f64) = (145.1768, -40.026);

/// Grid cell the target resolves to on [`bass_strait_archive`].
pub const BASS_STRAIT_CELL: (f64, f64) = (145.2, -40.0);

/// Latitude/longitude indices of [`BASS_STRAIT_CELL`].
pub const BASS_STRAIT_INDEX: (usize, usize) = (5, 5);

/// Variables present in every gridded synthetic file.
pub const WAVE_FILE_VARIABLES: [&str; 6] = ["hs", "t02", "dir", "fp", "u10m", "tm0m1"];

pub fn bass_strait_target() -> Coordinate {
    Coordinate::new(BASS_STRAIT_TARGET.0, BASS_STRAIT_TARGET.1)
}

/// 11 x 11 grid spanning 40.5S-39.5S, 144.7E-145.7E.
pub fn bass_strait_archive() -> SyntheticArchive {
    SyntheticArchive::new(
        regular_axis(-40.5, 0.1, 11),
        regular_axis(144.7, 0.1, 11),
        &WAVE_FILE_VARIABLES,
    )
}

pub fn ym(year: i32, month: u32) -> YearMonth {
    match YearMonth::new(year, month) {
        Ok(m) => m,
        Err(e) => panic!("bad fixture month {}-{}: {}", year, month, e),
    }
}

/// Creates a temporary directory that is deleted when dropped.
pub fn temp_test_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("hindcast-test-")
        .tempdir()
        .expect("Failed to create temp directory")
}
