//! Low-level helpers over the native netcdf library.
//!
//! Attribute lookup, packed-value decoding and dimension role detection.

use std::sync::Once;

/// Silence HDF5's automatic error printing to stderr.
///
/// The HDF5 C library prints verbose error messages to stderr even when errors
/// are handled gracefully by the Rust code (e.g., when probing an alias name
/// that does not exist in the file). Safe to call repeatedly; only the first
/// call has an effect.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 is thread-safe and null handlers are a
        // documented way of disabling the automatic error stack printing.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Check if a variable has an attribute with the given name.
/// This avoids HDF5 error spam when checking for optional attributes.
fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

/// Numeric attribute as f64, if present and numeric.
pub(crate) fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}

/// Text attribute, if present.
pub(crate) fn get_str_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        netcdf::AttributeValue::Strs(mut v) if !v.is_empty() => Some(v.remove(0)),
        _ => None,
    }
}

/// CF packing parameters of one variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Packing {
    pub scale_factor: f64,
    pub add_offset: f64,
    pub fill_value: Option<f64>,
    pub missing_value: Option<f64>,
}

impl Default for Packing {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            add_offset: 0.0,
            fill_value: None,
            missing_value: None,
        }
    }
}

impl Packing {
    pub(crate) fn of(var: &netcdf::Variable) -> Self {
        Self {
            scale_factor: get_f64_attr(var, "scale_factor").unwrap_or(1.0),
            add_offset: get_f64_attr(var, "add_offset").unwrap_or(0.0),
            fill_value: get_f64_attr(var, "_FillValue"),
            missing_value: get_f64_attr(var, "missing_value"),
        }
    }

    /// Unpack raw values in place; fill/missing markers become NaN.
    pub(crate) fn apply(&self, values: &mut [f64]) {
        for v in values.iter_mut() {
            let is_marker = self.fill_value.is_some_and(|f| *v == f)
                || self.missing_value.is_some_and(|m| *v == m);
            *v = if is_marker || !v.is_finite() {
                f64::NAN
            } else {
                *v * self.scale_factor + self.add_offset
            };
        }
    }
}

/// What a dimension indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DimRole {
    Time,
    Lat,
    Lon,
    Station,
    Other,
}

impl DimRole {
    pub(crate) fn of(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "time" | "t" => DimRole::Time,
            "latitude" | "lat" | "y" => DimRole::Lat,
            "longitude" | "lon" | "x" => DimRole::Lon,
            "station" | "stations" | "site" | "node" => DimRole::Station,
            _ => DimRole::Other,
        }
    }
}

/// Roles of a variable's dimensions, in storage order.
pub(crate) fn dim_roles(var: &netcdf::Variable) -> Vec<DimRole> {
    var.dimensions()
        .iter()
        .map(|d| DimRole::of(&d.name()))
        .collect()
}
