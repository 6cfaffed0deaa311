//! Coordinate and schema normalization of opened datasets.
//!
//! The raw view stores each grid point as one `(lat, lon)` sample along a
//! `value` dimension. [`repair_spatial`] turns that into a regular `y`/`x`
//! grid; the remaining steps apply level-type rules, the rename table and
//! drop inherited encodings. [`normalize`] runs them in order.

use std::cmp::Ordering;
use std::sync::Arc;

use grib_refs::{LevelType, LEVEL_DIM, TIME_DIM, VALUE_DIM};
use serde_json::Map;
use tracing::{debug, info, warn};

use crate::dataset::{ArrayData, ArrayValues, Dataset, NdArray, SpatialGather, Variable};
use crate::error::{GridProcessorError, Result};

pub const Y_DIM: &str = "y";
pub const X_DIM: &str = "x";
pub const PRESSURE_DIM: &str = "pressure";

/// Spatial chunk edge of the output store.
pub const SPATIAL_TILE: usize = 512;

/// Surface fields that do not vary in time.
pub const STATIC_SURFACE_FIELDS: &[&str] = &["lsm", "z"];

/// The source archive has no 600 hPa level; 500 hPa fields stand in for it.
pub const LEVEL_REMAP: (f64, f64) = (500.0, 600.0);

pub const RENAME_TABLE: &[(&str, &str)] = &[
    ("2t", "t2m"),
    ("10u", "u10m"),
    ("10v", "v10m"),
    ("sp", "pres0m"),
    ("msl", "pres_seasurface"),
    ("ssr", "swavr0m"),
    ("str", "lwavr0m"),
    ("z", "orography"),
    ("w", "tw"),
];

/// Full normalization for one level type.
pub fn normalize(ds: Dataset, level_type: LevelType) -> Result<Dataset> {
    let ds = repair_spatial(ds)?;
    let ds = apply_level_rules(ds, level_type)?;
    let ds = rename_variables(ds, RENAME_TABLE)?;
    let ds = clear_encoding(ds);
    info!(
        level_type = %level_type,
        data_vars = ?ds.data_vars.keys().collect::<Vec<_>>(),
        "Normalized dataset"
    );
    Ok(ds)
}

fn sorted_distinct(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
    out
}

fn position(axis: &[f64], value: f64) -> Result<usize> {
    axis.binary_search_by(|probe| probe.total_cmp(&value))
        .map_err(|_| GridProcessorError::schema(format!("coordinate {} not on axis", value)))
}

fn sample_coordinate(ds: &Dataset, name: &str) -> Result<(Vec<f64>, Map<String, serde_json::Value>)> {
    let var = ds
        .coords
        .get(name)
        .ok_or_else(|| GridProcessorError::schema(format!("missing '{}' coordinate", name)))?;
    if var.dims != [VALUE_DIM] {
        return Err(GridProcessorError::schema(format!(
            "'{}' has dimensions {:?}, expected [\"{}\"]",
            name, var.dims, VALUE_DIM
        )));
    }
    Ok((var.data.load()?.to_f64_vec(), var.attrs.clone()))
}

/// Expand the flattened sample dimension into orthogonal `y`/`x` axes.
///
/// Latitudes and longitudes are sorted ascending; grid cells without a
/// sample read as NaN. Adds 1-D `y`/`x` coordinates and 2-D `lat`/`lon`
/// fields. Fails on an already expanded dataset.
pub fn repair_spatial(mut ds: Dataset) -> Result<Dataset> {
    let dims = ds.dims()?;
    if dims.contains_key(Y_DIM) || dims.contains_key(X_DIM) {
        return Err(GridProcessorError::schema("spatial dimensions already expanded"));
    }
    let npoints = *dims.get(VALUE_DIM).ok_or_else(|| {
        GridProcessorError::schema(format!("no '{}' dimension to expand", VALUE_DIM))
    })?;

    let (lats, lat_attrs) = sample_coordinate(&ds, "lat")?;
    let (lons, lon_attrs) = sample_coordinate(&ds, "lon")?;
    let ys = sorted_distinct(&lats);
    let xs = sorted_distinct(&lons);
    let (ny, nx) = (ys.len(), xs.len());

    let mut index: Vec<Option<usize>> = vec![None; ny * nx];
    for (i, (lat, lon)) in lats.iter().zip(&lons).enumerate() {
        let cell = position(&ys, *lat)? * nx + position(&xs, *lon)?;
        if let Some(previous) = index[cell].replace(i) {
            return Err(GridProcessorError::schema(format!(
                "duplicate sample ({}, {}) at indices {} and {}",
                lat, lon, previous, i
            )));
        }
    }
    let holes = index.iter().filter(|c| c.is_none()).count();
    let gather = Arc::new(SpatialGather::new(ny, nx, npoints, index)?);

    ds.coords.remove("lat");
    ds.coords.remove("lon");
    for (name, var) in ds.variables_mut() {
        let Some(axis) = var.axis(VALUE_DIM) else {
            continue;
        };
        if axis + 1 != var.dims.len() {
            return Err(GridProcessorError::schema(format!(
                "'{}' has '{}' before other dimensions",
                name, VALUE_DIM
            )));
        }
        var.data = match &var.data {
            ArrayData::Eager(a) => ArrayData::Eager(a.gather_last(&gather)?),
            ArrayData::Lazy(l) => ArrayData::Lazy(l.with_spatial(Arc::clone(&gather))?),
        };
        var.dims.pop();
        var.dims.extend([Y_DIM.to_string(), X_DIM.to_string()]);
        var.chunks = None;
    }

    let axis = |values: &[f64], dim: &str, attrs: &Map<String, serde_json::Value>| -> Result<Variable> {
        let array = NdArray::new(vec![values.len()], ArrayValues::Float64(values.to_vec()))?;
        Ok(Variable::eager(&[dim], array)?.with_attrs(attrs.clone()))
    };
    ds.coords.insert(Y_DIM.to_string(), axis(&ys, Y_DIM, &lat_attrs)?);
    ds.coords.insert(X_DIM.to_string(), axis(&xs, X_DIM, &lon_attrs)?);

    let lat2d: Vec<f64> = ys.iter().flat_map(|y| std::iter::repeat(*y).take(nx)).collect();
    let lon2d: Vec<f64> = (0..ny).flat_map(|_| xs.iter().copied()).collect();
    for (name, values, attrs) in [("lat", lat2d, lat_attrs), ("lon", lon2d, lon_attrs)] {
        let array = NdArray::new(vec![ny, nx], ArrayValues::Float64(values))?;
        ds.coords
            .insert(name.to_string(), Variable::eager(&[Y_DIM, X_DIM], array)?.with_attrs(attrs));
    }

    if holes > 0 {
        warn!(holes, ny, nx, "Spatial grid has cells without samples");
    }
    debug!(ny, nx, npoints, "Repaired spatial index");
    Ok(ds)
}

fn chunking(var: &Variable) -> Vec<usize> {
    var.dims
        .iter()
        .map(|d| if d == Y_DIM || d == X_DIM { SPATIAL_TILE } else { 1 })
        .collect()
}

/// Level-type specific reductions, remaps and rechunking.
pub fn apply_level_rules(mut ds: Dataset, level_type: LevelType) -> Result<Dataset> {
    match level_type {
        LevelType::Surface => {
            for name in STATIC_SURFACE_FIELDS {
                let Some(var) = ds.data_vars.get(*name) else {
                    warn!(variable = name, "Static surface field not present, skipping");
                    continue;
                };
                if var.has_dim(TIME_DIM) {
                    let reduced = var.isel(TIME_DIM, 0)?;
                    ds.data_vars.insert(name.to_string(), reduced);
                }
            }
        }
        LevelType::PressureLevel => {
            match ds.coords.remove(LEVEL_DIM) {
                Some(mut level) => {
                    let (from, to) = LEVEL_REMAP;
                    let remapped = level
                        .data
                        .load()?
                        .map_float(|v| if v == from { to } else { v })?;
                    level.data = ArrayData::Eager(remapped);
                    level.rename_dim(LEVEL_DIM, PRESSURE_DIM);
                    ds.coords.insert(PRESSURE_DIM.to_string(), level);
                }
                None => warn!(coordinate = LEVEL_DIM, "Level axis not present, skipping remap"),
            }
            for (_, var) in ds.variables_mut() {
                var.rename_dim(LEVEL_DIM, PRESSURE_DIM);
            }
        }
    }

    for var in ds.data_vars.values_mut() {
        var.chunks = Some(chunking(var));
    }
    Ok(ds)
}

/// Rename variables by a `(from, to)` table. Absent sources are skipped.
pub fn rename_variables(mut ds: Dataset, table: &[(&str, &str)]) -> Result<Dataset> {
    for (from, to) in table {
        if !ds.contains(from) {
            continue;
        }
        if ds.contains(to) {
            return Err(GridProcessorError::schema(format!(
                "cannot rename '{}' to '{}': target exists",
                from, to
            )));
        }
        if let Some(var) = ds.data_vars.remove(*from) {
            ds.data_vars.insert(to.to_string(), var);
        } else if let Some(var) = ds.coords.remove(*from) {
            ds.coords.insert(to.to_string(), var);
        }
        debug!(from, to, "Renamed variable");
    }
    Ok(ds)
}

/// Drop per-variable encodings inherited from the manifest.
pub fn clear_encoding(mut ds: Dataset) -> Dataset {
    for (_, var) in ds.variables_mut() {
        var.encoding.clear();
    }
    ds
}
