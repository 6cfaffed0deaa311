use grib2_parser::{decode_message, scan_bytes, scan_file, Grib2Error};
use test_utils::{
    assert_approx_eq, assert_slice_approx_eq, pressure_archive, total_precipitation,
    two_message_surface_archive, write_archive, Grib2Builder,
};

#[test]
fn test_descriptor_ranges_are_disjoint_and_in_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let messages = pressure_archive();
    let path = write_archive(dir.path(), "pl.grib", &messages).unwrap();
    let file_len = std::fs::metadata(&path).unwrap().len();

    let descriptors = scan_file(&path).unwrap();
    assert_eq!(descriptors.len(), messages.len());

    for pair in descriptors.windows(2) {
        assert!(pair[0].end() <= pair[1].offset);
    }
    for d in &descriptors {
        assert!(d.end() <= file_len);
    }
    assert_eq!(descriptors[0].offset, 0);
    assert_eq!(descriptors[0].length, messages[0].len() as u64);
}

#[test]
fn test_padding_between_messages_is_skipped() {
    let messages = two_message_surface_archive();
    let mut data = b"\0\0header junk".to_vec();
    let first = data.len() as u64;
    data.extend_from_slice(&messages[0]);
    data.extend_from_slice(&[0u8; 7]);
    let second = data.len() as u64;
    data.extend_from_slice(&messages[1]);

    let descriptors = scan_bytes(&data).unwrap();
    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0].offset, first);
    assert_eq!(descriptors[1].offset, second);
}

#[test]
fn test_descriptor_metadata() {
    let msg = Grib2Builder::new_ecmwf()
        .with_reference_time(2024, 1, 1, 0)
        .with_parameter(2, 2)
        .with_level(103, 10)
        .with_forecast_hour(6)
        .build();

    let d = &scan_bytes(&msg).unwrap()[0];
    assert_eq!(d.center, 98);
    assert_eq!(d.parameter.discipline, 0);
    assert_eq!(d.parameter.category, 2);
    assert_eq!(d.parameter.number, 2);
    assert_eq!(d.level.level_type, 103);
    assert_eq!(d.level.value, 10.0);
    assert_eq!(d.step_seconds, 6 * 3600);
    assert_eq!(d.valid_time().to_rfc3339(), "2024-01-01T06:00:00+00:00");
    assert_eq!(d.num_points(), 4);
    assert!(!d.has_bitmap);
}

#[test]
fn test_accumulations_are_valid_at_interval_end() {
    let archive = [total_precipitation(6), total_precipitation(12)].concat();
    let descriptors = scan_bytes(&archive).unwrap();

    let valid: Vec<String> = descriptors.iter().map(|d| d.valid_time().to_rfc3339()).collect();
    assert_eq!(
        valid,
        vec!["2024-01-01T06:00:00+00:00", "2024-01-01T12:00:00+00:00"]
    );
    assert_eq!(descriptors[1].step_seconds, 12 * 3600);
}

#[test]
fn test_truncated_archive() {
    let mut data = two_message_surface_archive().concat();
    let full = data.len();
    data.truncate(full - 10);

    match scan_bytes(&data).unwrap_err() {
        Grib2Error::Truncated {
            offset, available, ..
        } => {
            let first_len = two_message_surface_archive()[0].len();
            assert_eq!(offset, first_len as u64);
            assert_eq!(available as usize, full - 10 - first_len);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_end_marker() {
    let mut msg = Grib2Builder::new_ecmwf().build();
    let n = msg.len();
    msg[n - 1] = b'6';
    assert!(matches!(
        scan_bytes(&msg).unwrap_err(),
        Grib2Error::InvalidMessage { offset: 0, .. }
    ));
}

#[test]
fn test_decode_message_round_trip() {
    let values = vec![271.5, 280.25, 290.0, 301.75];
    let msg = Grib2Builder::new_ecmwf().with_data(values.clone()).build();

    let decoded = decode_message(&msg).unwrap();
    assert_slice_approx_eq!(decoded, values, 1e-3);
}

#[test]
fn test_decode_message_with_bitmap() {
    let msg = Grib2Builder::new_ecmwf()
        .with_data(vec![1.0, f32::NAN, f32::NAN, 4.0])
        .build();

    let decoded = decode_message(&msg).unwrap();
    assert_eq!(decoded.len(), 4);
    assert_approx_eq!(decoded[0], 1.0, 1e-3);
    assert!(decoded[1].is_nan());
    assert!(decoded[2].is_nan());
    assert_approx_eq!(decoded[3], 4.0, 1e-3);
}

#[test]
fn test_decode_constant_field() {
    let msg = Grib2Builder::new_ecmwf().with_constant_value(288.15).build();
    assert_eq!(decode_message(&msg).unwrap(), vec![288.15f32; 4]);
}
