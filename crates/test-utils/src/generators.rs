//! Deterministic data generators for synthetic monthly files.
//!
//! Values encode where they came from so tests can check that the right
//! cell, month and time step ended up in the right row.

use chrono::{DateTime, Duration, Utc};
use hindcast_common::YearMonth;

/// Evenly spaced axis of `n` values starting at `start`.
///
/// Values are computed as `start + i * step` and rounded to 6 decimals so
/// that axes compare equal to literal coordinates in tests.
pub fn regular_axis(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| ((start + i as f64 * step) * 1e6).round() / 1e6)
        .collect()
}

/// Hourly time axis covering every hour of `month`.
///
/// # Example
///
/// ```
/// use hindcast_common::YearMonth;
/// use test_utils::hourly_month;
///
/// let axis = hourly_month(YearMonth::new(2015, 2).unwrap());
/// assert_eq!(axis.len(), 28 * 24);
/// ```
pub fn hourly_month(month: YearMonth) -> Vec<DateTime<Utc>> {
    let start = month.start_instant();
    let hours = month.days_in_month() as i64 * 24;
    (0..hours).map(|h| start + Duration::hours(h)).collect()
}

/// Value of variable number `variable` at one time step and cell.
///
/// `variable * 1000 + month + lat_index * 0.01 + lon_index * 0.0001`, plus
/// a per-step ramp in the millionths. `month` is the calendar month (1-12).
pub fn synthetic_value(
    variable: usize,
    month: YearMonth,
    step: usize,
    lat_index: usize,
    lon_index: usize,
) -> f64 {
    (variable as f64) * 1000.0
        + month.month() as f64
        + lat_index as f64 * 0.01
        + lon_index as f64 * 0.0001
        + step as f64 * 1e-6
}

/// Whole-month series for one cell, see [`synthetic_value`].
pub fn synthetic_series(
    variable: usize,
    month: YearMonth,
    lat_index: usize,
    lon_index: usize,
) -> Vec<f64> {
    (0..hourly_month(month).len())
        .map(|step| synthetic_value(variable, month, step, lat_index, lon_index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hourly_month_lengths() {
        assert_eq!(hourly_month(YearMonth::new(2015, 1).unwrap()).len(), 744);
        assert_eq!(hourly_month(YearMonth::new(2016, 2).unwrap()).len(), 696);
        assert_eq!(hourly_month(YearMonth::new(2015, 4).unwrap()).len(), 720);
    }

    #[test]
    fn test_regular_axis_rounding() {
        let axis = regular_axis(144.7, 0.1, 11);
        assert_eq!(axis[5], 145.2);
        assert_eq!(axis[10], 145.7);
    }

    #[test]
    fn test_synthetic_value_encodes_origin() {
        let m = YearMonth::new(2015, 3).unwrap();
        let v = synthetic_value(2, m, 0, 4, 5);
        assert!((v - 2003.0405).abs() < 1e-9);
    }
}
