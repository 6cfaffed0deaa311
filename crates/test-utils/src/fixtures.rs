//! Ready-made synthetic archives.
//!
//! All fixtures share one 2x2 grid: latitudes {1, 0} scanned north to south,
//! longitudes {0, 1}, so the sample points are (1,0), (1,1), (0,0), (0,1)
//! in payload order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::grib2::Grib2Builder;

/// Concatenate messages into one archive file under `dir`.
pub fn write_archive(dir: &Path, name: &str, messages: &[Vec<u8>]) -> io::Result<PathBuf> {
    let path = dir.join(name);
    let bytes: Vec<u8> = messages.iter().flatten().copied().collect();
    fs::write(&path, bytes)?;
    Ok(path)
}

/// 2 m temperature (0/0/0 at 2 m) at 2024-01-01T00 + `step` hours.
///
/// Values are `base + index` in payload order.
pub fn surface_temperature(step: u32, base: f32) -> Vec<u8> {
    Grib2Builder::new_ecmwf()
        .with_parameter(0, 0)
        .with_level(103, 2)
        .with_forecast_hour(step)
        .with_data((0..4).map(|i| base + i as f32).collect())
        .build()
}

/// Surface geopotential (0/3/4 on the ground).
pub fn terrain_height(step: u32) -> Vec<u8> {
    Grib2Builder::new_ecmwf()
        .with_parameter(3, 4)
        .with_missing_level(1)
        .with_forecast_hour(step)
        .with_data(vec![100.0, 200.0, 300.0, 400.0])
        .build()
}

/// Land-sea mask (2/0/0 on the ground).
pub fn land_sea_mask(step: u32) -> Vec<u8> {
    Grib2Builder::new_ecmwf()
        .with_discipline(2)
        .with_parameter(0, 0)
        .with_missing_level(1)
        .with_forecast_hour(step)
        .with_data(vec![0.0, 1.0, 1.0, 0.0])
        .build()
}

/// Total precipitation (0/1/8 on the ground) accumulated from the
/// reference time to `end_hour`, as template 4.8.
pub fn total_precipitation(end_hour: u32) -> Vec<u8> {
    Grib2Builder::new_ecmwf()
        .with_parameter(1, 8)
        .with_missing_level(1)
        .with_accumulation(0, end_hour)
        .with_data((0..4).map(|i| end_hour as f32 + i as f32 / 10.0).collect())
        .build()
}

/// Temperature on an isobaric surface given in hPa.
pub fn pressure_temperature(step: u32, hpa: u32) -> Vec<u8> {
    Grib2Builder::new_ecmwf()
        .with_parameter(0, 0)
        .with_level(100, hpa * 100)
        .with_forecast_hour(step)
        .with_data((0..4).map(|i| hpa as f32 / 10.0 + i as f32).collect())
        .build()
}

/// The smallest surface archive: one 2 m temperature and one terrain field.
pub fn two_message_surface_archive() -> Vec<Vec<u8>> {
    vec![surface_temperature(0, 280.0), terrain_height(0)]
}

/// Two steps of temperature on 300, 500 and 700 hPa.
pub fn pressure_archive() -> Vec<Vec<u8>> {
    let mut messages = Vec::new();
    for step in [0, 6] {
        for hpa in [300, 500, 700] {
            messages.push(pressure_temperature(step, hpa));
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_archive_concatenates() {
        let dir = tempfile::tempdir().unwrap();
        let messages = two_message_surface_archive();
        let path = write_archive(dir.path(), "sfc.grib", &messages).unwrap();

        let len = fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, messages[0].len() + messages[1].len());
    }

    #[test]
    fn test_pressure_archive_size() {
        assert_eq!(pressure_archive().len(), 6);
    }
}
