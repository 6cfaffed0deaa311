use std::sync::Arc;

use grib_index::{FileIndex, FingerprintMethod, IndexStore};
use grib_refs::{
    build, flatten, IfsMapping, LevelType, NormalizedManifest, RefItem, RefKey, Reference,
    RefsError,
};
use test_utils::{
    pressure_archive, surface_temperature, terrain_height, total_precipitation,
    two_message_surface_archive, write_archive, Grib2Builder,
};

fn index(messages: &[Vec<u8>]) -> (tempfile::TempDir, Arc<FileIndex>) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_archive(dir.path(), "archive.grib", messages).unwrap();
    let store = IndexStore::new(dir.path().join("idx"), FingerprintMethod::SizeMtime);
    let index = store.get_or_build(&path).unwrap();
    (dir, index)
}

fn le_f64(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

#[test]
fn test_surface_archive_layout() {
    let (_dir, idx) = index(&two_message_surface_archive());
    let manifest = build(&[idx.clone()], &IfsMapping::default()).unwrap();

    assert_eq!(manifest.groups().into_iter().collect::<Vec<_>>(), vec!["atm2d"]);

    let flat = flatten(&manifest, LevelType::Surface).unwrap();
    assert_eq!(flat.arrays(), vec!["2t", "lat", "lon", "time", "z"]);

    let meta = flat.array_meta("2t").unwrap();
    assert_eq!(meta["shape"], serde_json::json!([1, 4]));
    assert_eq!(meta["chunks"], serde_json::json!([1, 4]));
    assert_eq!(meta["dtype"], "<f4");
    assert_eq!(meta["compressor"]["id"], "rawgrib");
    assert_eq!(
        flat.array_attrs("2t").unwrap()["_ARRAY_DIMENSIONS"],
        serde_json::json!(["time", "value"])
    );

    // Payload chunks reference whole messages
    let chunks: Vec<_> = flat.chunks("z").collect();
    assert_eq!(chunks.len(), 1);
    let d = &idx.messages[1];
    assert_eq!(
        chunks[0],
        (
            &[0u64, 0][..],
            &Reference::Range {
                file: idx.source.to_string_lossy().into_owned(),
                offset: d.offset,
                length: d.length,
            }
        )
    );

    // Inline coordinates
    let lat = match flat.get(&RefKey::array(None, "lat", RefItem::Chunk(vec![0]))) {
        Some(Reference::Inline(grib_refs::InlineValue::Bytes(b))) => le_f64(b),
        other => panic!("unexpected lat reference: {other:?}"),
    };
    assert_eq!(lat, vec![1.0, 1.0, 0.0, 0.0]);
}

#[test]
fn test_pressure_levels_are_sorted_axes() {
    let mut messages = pressure_archive();
    messages.reverse();
    let (_dir, idx) = index(&messages);

    let manifest = build(&[idx], &IfsMapping::default()).unwrap();
    let flat = flatten(&manifest, LevelType::PressureLevel).unwrap();

    assert_eq!(
        flat.array_meta("t").unwrap()["shape"],
        serde_json::json!([2, 3, 4])
    );
    let levels = match flat.get(&RefKey::array(None, "level", RefItem::Chunk(vec![0]))) {
        Some(Reference::Inline(grib_refs::InlineValue::Bytes(b))) => le_f64(b),
        other => panic!("unexpected level reference: {other:?}"),
    };
    assert_eq!(levels, vec![300.0, 500.0, 700.0]);

    let indices: Vec<Vec<u64>> = flat.chunks("t").map(|(i, _)| i.to_vec()).collect();
    assert_eq!(indices.len(), 6);
    assert!(indices.contains(&vec![1, 2, 0]));

    assert!(matches!(
        flatten(&manifest, LevelType::Surface),
        Err(RefsError::Schema(_))
    ));
}

#[test]
fn test_duplicate_placement_names_both_messages() {
    let messages = vec![surface_temperature(0, 280.0), surface_temperature(0, 290.0)];
    let (_dir, idx) = index(&messages);

    let err = build(&[idx.clone()], &IfsMapping::default()).unwrap_err();
    let text = err.to_string();
    assert!(matches!(err, RefsError::Configuration(_)));
    assert!(text.contains(&format!("@{}", idx.messages[0].offset)));
    assert!(text.contains(&format!("@{}", idx.messages[1].offset)));
}

#[test]
fn test_accumulations_from_one_start_fill_the_time_axis() {
    let (_dir, idx) = index(&[total_precipitation(6), total_precipitation(12)]);

    let manifest = build(&[idx.clone()], &IfsMapping::default()).unwrap();
    let flat = flatten(&manifest, LevelType::Surface).unwrap();
    assert_eq!(flat.array_meta("tp").unwrap()["shape"], serde_json::json!([2, 4]));

    let seconds: Vec<i64> = match flat.get(&RefKey::array(None, "time", RefItem::Chunk(vec![0]))) {
        Some(Reference::Inline(grib_refs::InlineValue::Bytes(b))) => b
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
            .collect(),
        other => panic!("unexpected time reference: {other:?}"),
    };
    let base = idx.messages[0].reference_time.timestamp();
    assert_eq!(seconds, vec![base + 6 * 3600, base + 12 * 3600]);

    let offsets: Vec<(Vec<u64>, u64)> = flat
        .chunks("tp")
        .map(|(i, r)| match r {
            Reference::Range { offset, .. } => (i.to_vec(), *offset),
            other => panic!("unexpected chunk reference: {other:?}"),
        })
        .collect();
    assert_eq!(
        offsets,
        vec![(vec![0, 0], idx.messages[0].offset), (vec![1, 0], idx.messages[1].offset)]
    );
}

#[test]
fn test_same_message_in_two_files_is_duplicate() {
    let (_a, first) = index(&[surface_temperature(0, 280.0)]);
    let (_b, second) = index(&[surface_temperature(0, 280.0)]);

    assert!(matches!(
        build(&[first, second], &IfsMapping::default()),
        Err(RefsError::Configuration(_))
    ));
}

#[test]
fn test_disjoint_steps_across_files() {
    let (_a, first) = index(&[surface_temperature(0, 280.0), terrain_height(0)]);
    let (_b, second) = index(&[surface_temperature(6, 281.0), terrain_height(6)]);

    let manifest = build(&[first, second], &IfsMapping::default()).unwrap();
    let flat = flatten(&manifest, LevelType::Surface).unwrap();
    assert_eq!(flat.array_meta("2t").unwrap()["shape"], serde_json::json!([2, 4]));
    assert_eq!(flat.chunks("z").count(), 2);
}

#[test]
fn test_point_count_mismatch_is_configuration_error() {
    let messages = vec![
        surface_temperature(0, 280.0),
        Grib2Builder::new_ecmwf()
            .with_grid(3, 2)
            .with_parameter(3, 4)
            .with_missing_level(1)
            .build(),
    ];
    let (_dir, idx) = index(&messages);

    let err = build(&[idx], &IfsMapping::default()).unwrap_err();
    assert!(err.to_string().contains("chunk shape mismatch"));
}

#[test]
fn test_grid_mismatch_is_configuration_error() {
    let messages = vec![
        surface_temperature(0, 280.0),
        Grib2Builder::new_ecmwf()
            .with_origin(50.0, 10.0, 1.0, 1.0)
            .with_parameter(3, 4)
            .with_missing_level(1)
            .build(),
    ];
    let (_dir, idx) = index(&messages);

    assert!(matches!(
        build(&[idx], &IfsMapping::default()),
        Err(RefsError::Configuration(_))
    ));
}

#[test]
fn test_artifact_round_trip() {
    let (dir, idx) = index(&pressure_archive());
    let manifest = build(&[idx], &IfsMapping::default()).unwrap();
    let flat = flatten(&manifest, LevelType::PressureLevel).unwrap();

    let path = dir.path().join("refs/archive/pressure_level.json");
    flat.save(&path).unwrap();
    assert_eq!(NormalizedManifest::load(&path).unwrap(), flat);
}
