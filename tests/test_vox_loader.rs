//! Tests for parsing VOX streams: header scanning bounds, required fields,
//! payload decoding and the diagnostics returned on failure.

use proptest::prelude::*;
use vox_dicom::{HeaderLimits, ParseError, VoxLoader};

const SCENARIO_HEADER: &str =
    "VolumeSize 2 3 1\nField 0 ... Size 16 ...\nVolumeScale 0.5 0.5 1.0\n";

fn le_bytes(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn vox_bytes(header: &str, samples: &[u16]) -> Vec<u8> {
    let mut bytes = header.as_bytes().to_vec();
    bytes.extend(le_bytes(samples));
    bytes
}

#[test]
fn test_scenario_volume_parses_into_slice_row_column_grid() {
    let bytes = vox_bytes(&format!("{SCENARIO_HEADER}##\n"), &[1, 2, 3, 4, 5, 6]);
    let parsed = VoxLoader::default().load_from_bytes(&bytes).unwrap();

    assert_eq!(parsed.grid.dim(), (1, 3, 2));
    assert_eq!(parsed.grid.data()[[0, 0, 0]], 1);
    assert_eq!(parsed.grid.data()[[0, 0, 1]], 2);
    assert_eq!(parsed.grid.data()[[0, 1, 0]], 3);
    assert_eq!(parsed.grid.data()[[0, 2, 1]], 6);

    assert_eq!(parsed.metadata.dimensions, [2, 3, 1]);
    assert_eq!(parsed.metadata.bits_per_voxel, 16);
    assert_eq!(parsed.metadata.scale.as_deref(), Some("0.5 0.5 1.0"));
    assert_eq!(parsed.metadata.scale().unwrap(), [0.5, 0.5, 1.0]);
}

#[test]
fn test_form_feed_marker_followed_directly_by_payload() {
    let bytes = vox_bytes(&format!("{SCENARIO_HEADER}##\x0c"), &[1, 2, 3, 4, 5, 6]);
    let parsed = VoxLoader::default().load_from_bytes(&bytes).unwrap();

    let values: Vec<u16> = parsed.grid.data().iter().copied().collect();
    assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_whitespace_valued_samples_after_form_feed_marker_are_payload() {
    // 0x2020 and 0x0b09 are made of space, tab and vertical tab bytes.
    let bytes = vox_bytes("VolumeSize 2 1 1\nField 0 Size 16\n##\x0c", &[0x2020, 0x0b09]);
    let parsed = VoxLoader::default().load_from_bytes(&bytes).unwrap();

    let values: Vec<u16> = parsed.grid.data().iter().copied().collect();
    assert_eq!(values, vec![0x2020, 0x0b09]);
}

#[test]
fn test_form_feed_marker_keeps_whitespace_line_of_payload() {
    // The first payload line is ` \r\n`, it trims down to a bare `##`.
    let mut bytes = b"VolumeSize 4 1 1\nField 0 Size 8\n##\x0c\x20\x0d\x0a".to_vec();
    bytes.push(0x09);
    let parsed = VoxLoader::default().load_from_bytes(&bytes).unwrap();
    let values: Vec<u16> = parsed.grid.data().iter().copied().collect();
    assert_eq!(values, vec![0x20, 0x0d, 0x0a, 0x09]);
}

#[test]
fn test_line_ending_after_form_feed_marker_is_not_payload() {
    for ending in ["\n", "\r\n"] {
        let header = format!("VolumeSize 2 1 1\nField 0 Size 16\n##\x0c{ending}");
        let parsed = VoxLoader::default()
            .load_from_bytes(&vox_bytes(&header, &[3, 4]))
            .unwrap();
        let values: Vec<u16> = parsed.grid.data().iter().copied().collect();
        assert_eq!(values, vec![3, 4]);
    }
}

#[test]
fn test_marker_sharing_a_line_with_payload_is_not_a_terminator() {
    // `##` only ends the header at the end of a line or before a form feed.
    let bytes = vox_bytes(&format!("{SCENARIO_HEADER}##"), &[1, 2, 3, 4, 5, 6]);

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    match failure.kind {
        ParseError::HeaderTooLarge { read, .. } => assert_eq!(read, bytes.len() as u64),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(failure.metadata.unwrap().dimensions, [2, 3, 1]);
}

#[test]
fn test_raw_marker_inside_binary_line_salvages_header() {
    let mut bytes = b"VolumeSize 2 1 1\nField 0 Size 16\n\xff##\x0c".to_vec();
    bytes.extend(le_bytes(&[7, 9]));

    let parsed = VoxLoader::default().load_from_bytes(&bytes).unwrap();
    assert_eq!(parsed.grid.data().iter().copied().collect::<Vec<_>>(), vec![7, 9]);
    assert!(parsed.log.lines()[2].starts_with("DECODE_ERROR"));
}

#[test]
fn test_salvaged_marker_keeps_whitespace_valued_payload() {
    let mut bytes = b"VolumeSize 2 1 1\nField 0 Size 16\n\xff##\x0c".to_vec();
    bytes.extend(le_bytes(&[0x2020, 0x0d09]));

    let parsed = VoxLoader::default().load_from_bytes(&bytes).unwrap();
    let values: Vec<u16> = parsed.grid.data().iter().copied().collect();
    assert_eq!(values, vec![0x2020, 0x0d09]);
}

#[test]
fn test_marker_before_required_fields_does_not_end_header() {
    let header = "Vox1999a\n##\nVolumeSize 2 1 1\nField 0 Size 16 Format unsigned\n##\n";
    let parsed = VoxLoader::default()
        .load_from_bytes(&vox_bytes(header, &[10, 20]))
        .unwrap();

    assert_eq!(parsed.grid.dim(), (1, 1, 2));
    assert_eq!(parsed.metadata.voxel_format.as_deref(), Some("unsigned"));
    assert_eq!(
        parsed.log.lines(),
        ["Vox1999a", "##", "VolumeSize 2 1 1", "Field 0 Size 16 Format unsigned", "##"]
    );
}

#[test]
fn test_long_line_is_not_a_text_header() {
    let long_line = "A".repeat(3000);
    let bytes = format!("VolumeSize 2 1 1\n{long_line}\nField 0 Size 16\n##\n").into_bytes();

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(
        failure.kind,
        ParseError::NotTextHeader {
            limit: 2048,
            ..
        }
    ));
    assert!(failure.log.lines().last().unwrap().starts_with("SAFETY_ABORT"));
}

#[test]
fn test_line_at_the_length_limit_is_accepted() {
    // 2047 bytes of text plus the newline.
    let comment = format!("#{}", "x".repeat(2046));
    let header = format!("VolumeSize 1 1 1\n{comment}\nField 0 Size 16\n##\n");
    let parsed = VoxLoader::default()
        .load_from_bytes(&vox_bytes(&header, &[5]))
        .unwrap();

    assert_eq!(parsed.grid.dim(), (1, 1, 1));
    assert_eq!(parsed.log.lines()[1].len(), 2047);
}

#[test]
fn test_binary_stream_without_newlines_is_not_a_text_header() {
    let bytes = vec![0xAB_u8; 10_000];
    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(failure.kind, ParseError::NotTextHeader { .. }));
}

#[test]
fn test_binary_in_header_is_rejected() {
    let bytes = b"VolumeSize 2 1 1\n\xff\xfe\x00\x01\nField 0 Size 16\n##\n".to_vec();

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(failure.kind, ParseError::BinaryInHeader { line: 2 }));
    assert_eq!(failure.log.len(), 2);
    assert!(failure.metadata.is_none());
}

#[test]
fn test_missing_terminator_is_header_too_large() {
    let bytes = b"VolumeSize 2 1 1\nField 0 Size 16\n".to_vec();

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(failure.kind, ParseError::HeaderTooLarge { .. }));
    assert_eq!(failure.log.len(), 2);
}

#[test]
fn test_header_of_exactly_five_mib_is_too_large() {
    // 5120 lines of 1 KiB each, then a valid header that must never be read.
    let filler = format!("#{}\n", "x".repeat(1022));
    let mut bytes = filler.repeat(5 * 1024).into_bytes();
    assert_eq!(bytes.len(), 5 * 1024 * 1024);
    bytes.extend(vox_bytes("VolumeSize 1 1 1\nField 0 Size 16\n##\n", &[1]));

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(
        failure.kind,
        ParseError::HeaderTooLarge {
            limit: 5_242_880,
            read: 5_242_880
        }
    ));
}

#[test]
fn test_custom_header_limit() {
    let loader = VoxLoader::with_limits(HeaderLimits {
        max_header_bytes: 32,
        max_line_bytes: 2048,
    });
    let bytes = vox_bytes(
        "Comment one two three four\nVolumeSize 1 1 1\nField 0 Size 16\n##\n",
        &[1],
    );

    let failure = loader.load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(failure.kind, ParseError::HeaderTooLarge { limit: 32, .. }));
}

#[test]
fn test_terminator_without_volume_size_is_missing_field() {
    let bytes = b"Field 0 Size 16\nVolumeScale 1 1 1\n##\n".to_vec();

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(
        failure.kind,
        ParseError::MissingRequiredField { field: "VolumeSize" }
    ));
}

#[test]
fn test_terminator_without_bit_depth_is_missing_field() {
    let bytes = b"VolumeSize 2 2 2\nField 0 Format unsigned\n##\n".to_vec();

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(
        failure.kind,
        ParseError::MissingRequiredField {
            field: "Field 0 Size"
        }
    ));
}

#[test]
fn test_truncated_payload_keeps_metadata() {
    let bytes = vox_bytes(&format!("Endian L\n{SCENARIO_HEADER}##\n"), &[1, 2]);

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(
        failure.kind,
        ParseError::TruncatedPayload {
            expected: 12,
            actual: 4
        }
    ));

    let metadata = failure.metadata.as_ref().expect("metadata should survive a short payload");
    assert_eq!(metadata.dimensions, [2, 3, 1]);
    assert_eq!(metadata.bits_per_voxel, 16);
    assert_eq!(metadata.endianness.as_deref(), Some("L"));
    assert_eq!(failure.log.len(), 5);
    assert!(failure.to_string().contains("expected 12"));
}

#[test]
fn test_big_endian_volume_is_rejected() {
    let bytes = vox_bytes("Endian B\nVolumeSize 1 1 1\nField 0 Size 16\n##\n", &[1]);

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(failure.kind, ParseError::UnsupportedEndianness(ref token) if token == "B"));
    assert!(failure.metadata.is_some());
}

#[test]
fn test_eight_bit_samples_are_widened() {
    let mut bytes = b"VolumeSize 3 1 1\nField 0 Size 8\n##\n".to_vec();
    bytes.extend([0_u8, 128, 255]);

    let parsed = VoxLoader::default().load_from_bytes(&bytes).unwrap();
    let values: Vec<u16> = parsed.grid.data().iter().copied().collect();
    assert_eq!(values, vec![0, 128, 255]);
}

#[test]
fn test_wide_samples_are_rejected() {
    let mut bytes = b"VolumeSize 1 1 1\nField 0 Size 32\n##\n".to_vec();
    bytes.extend([0_u8; 4]);

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    assert!(matches!(failure.kind, ParseError::UnsupportedBitDepth(32)));
}

#[test]
fn test_malformed_volume_size_is_unknown_error() {
    let bytes = b"VolumeSize 2 x 1\nField 0 Size 16\n##\n".to_vec();

    let failure = VoxLoader::default().load_from_bytes(&bytes).unwrap_err();
    match failure.kind {
        ParseError::Unknown(message) => assert!(message.contains("VolumeSize 2 x 1")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_load_from_path() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let bytes = vox_bytes(&format!("{SCENARIO_HEADER}##\n"), &[1, 2, 3, 4, 5, 6]);
    std::fs::write(file.path(), bytes).unwrap();

    let parsed = VoxLoader::default().load_from_path(file.path()).unwrap();
    assert_eq!(parsed.grid.len(), 6);

    let missing = VoxLoader::default().load_from_path(file.path().with_extension("missing"));
    assert!(matches!(missing.unwrap_err().kind, ParseError::Unknown(_)));
}

proptest! {
    #[test]
    fn prop_grid_matches_declared_dimensions(
        (x, y, z, samples) in (1usize..6, 1usize..6, 1usize..6).prop_flat_map(|(x, y, z)| {
            (Just(x), Just(y), Just(z), prop::collection::vec(any::<u16>(), x * y * z))
        })
    ) {
        let header = format!("Endian L\nVolumeSize {x} {y} {z}\nField 0 Size 16\n##\n");
        let parsed = VoxLoader::default().load_from_bytes(&vox_bytes(&header, &samples)).unwrap();

        prop_assert_eq!(parsed.grid.len(), x * y * z);
        prop_assert_eq!(parsed.grid.dim(), (z, y, x));
        prop_assert_eq!(parsed.metadata.dimensions, [x, y, z]);
        for k in 0..z {
            for j in 0..y {
                for i in 0..x {
                    prop_assert_eq!(parsed.grid.data()[[k, j, i]], samples[i + x * (j + y * k)]);
                }
            }
        }
    }
}
