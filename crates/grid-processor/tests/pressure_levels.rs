use std::path::Path;
use std::sync::Arc;

use grib_index::{FingerprintMethod, IndexStore};
use grib_refs::{build, flatten, IfsMapping, LevelType};
use grid_processor::{
    normalize, DatasetReader, GridProcessorConfig, GridProcessorError, ZarrCompression, ZarrWriter,
};
use serde_json::{json, Value};
use test_utils::{assert_slice_approx_eq, pressure_archive, write_archive};
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

fn open_pressure(dir: &Path, reader: &DatasetReader) -> grid_processor::Dataset {
    let path = write_archive(dir, "pl.grib", &pressure_archive()).unwrap();
    let index = IndexStore::new(dir.join("idx"), FingerprintMethod::SizeMtime)
        .get_or_build(&path)
        .unwrap();
    let manifest = build(&[index], &IfsMapping::default()).unwrap();
    reader
        .open(&flatten(&manifest, LevelType::PressureLevel).unwrap())
        .unwrap()
}

fn zarr_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path.join("zarr.json")).unwrap()).unwrap()
}

#[test]
fn test_pressure_dataset_normalizes_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let reader = DatasetReader::default();
    let ds = normalize(open_pressure(dir.path(), &reader), LevelType::PressureLevel).unwrap();

    assert_eq!(reader.cache_stats().misses, 0);
    assert_eq!(
        ds.coords["pressure"].data.load().unwrap().to_f64_vec(),
        vec![300.0, 600.0, 700.0]
    );
    let t = &ds.data_vars["t"];
    assert_eq!(t.dims, vec!["time", "pressure", "y", "x"]);
    assert_eq!(t.shape(), vec![2, 3, 2, 2]);
    assert_eq!(t.chunks, Some(vec![1, 1, 512, 512]));
    assert!(t.encoding.is_empty());
}

#[test]
fn test_pressure_store_contents() {
    let dir = tempfile::tempdir().unwrap();
    let reader = DatasetReader::default();
    let ds = normalize(open_pressure(dir.path(), &reader), LevelType::PressureLevel).unwrap();

    let dest = dir.path().join("era/zarr/output.zarr");
    let summary = ZarrWriter::new(GridProcessorConfig::default())
        .write(&ds, &dest)
        .unwrap();
    // lat, lon, pressure, t, time, x, y
    assert_eq!(summary.arrays, 7);
    assert_eq!(reader.cache_stats().misses, 6);

    let meta = zarr_json(&dest.join("t"));
    assert_eq!(meta["dimension_names"], json!(["time", "pressure", "y", "x"]));
    assert_eq!(meta["chunk_grid"]["configuration"]["chunk_shape"], json!([1, 1, 2, 2]));

    // Step 6h, the remapped 500 hPa level: grid rows are south to north
    let store = Arc::new(FilesystemStore::new(&dest).unwrap());
    let array = Array::open(store, "/t").unwrap();
    let subset = ArraySubset::new_with_start_shape(vec![1, 1, 0, 0], vec![1, 1, 2, 2]).unwrap();
    let values: Vec<f32> = array.retrieve_array_subset_elements(&subset).unwrap();
    assert_slice_approx_eq!(values, [52.0f32, 53.0, 50.0, 51.0], 1e-2);
}

#[test]
fn test_surface_rules_on_pressure_data_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let ds = open_pressure(dir.path(), &DatasetReader::default());

    // No static fields and no renames apply; the level axis stays
    let ds = normalize(ds, LevelType::Surface).unwrap();
    assert!(ds.coords.contains_key("level"));
    assert_eq!(ds.data_vars["t"].dims, vec!["time", "level", "y", "x"]);
}

#[test]
fn test_uncompressed_store() {
    let dir = tempfile::tempdir().unwrap();
    let ds = normalize(
        open_pressure(dir.path(), &DatasetReader::default()),
        LevelType::PressureLevel,
    )
    .unwrap();

    let writer = ZarrWriter::new(GridProcessorConfig {
        zarr_compression: ZarrCompression::None,
        ..Default::default()
    });
    let dest = dir.path().join("plain.zarr");
    writer.write(&ds, &dest).unwrap();
    let codecs = zarr_json(&dest.join("t"))["codecs"].clone();
    assert_eq!(codecs.as_array().unwrap().len(), 1);
}

#[test]
fn test_missing_source_fails_the_write() {
    let dir = tempfile::tempdir().unwrap();
    let ds = normalize(
        open_pressure(dir.path(), &DatasetReader::default()),
        LevelType::PressureLevel,
    )
    .unwrap();
    std::fs::remove_file(dir.path().join("pl.grib")).unwrap();

    let err = ZarrWriter::new(GridProcessorConfig::default())
        .write(&ds, &dir.path().join("out.zarr"))
        .unwrap_err();
    assert!(matches!(err, GridProcessorError::RangeRead { .. }));
}
