//! yEnc round-trip property: decoding an encoded byte string recovers it
//! exactly, and the computed CRC matches the trailer.

mod common;

use common::yenc_encode;
use nzb_engine::{CrcState, SegmentData, yenc_decode};

/// Deterministic pseudo-random bytes (xorshift), so failures reproduce
fn pseudo_random_bytes(len: usize, mut seed: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        out.push((seed & 0xff) as u8);
    }
    out
}

fn assert_roundtrip(data: &[u8], line_width: usize) {
    let encoded = yenc_encode(data, line_width, "roundtrip.bin", None);
    let decoded = yenc_decode(&encoded).unwrap();

    match &decoded.data {
        SegmentData::Buffered(bytes) => assert_eq!(
            bytes, data,
            "round-trip mismatch at width {} len {}",
            line_width,
            data.len()
        ),
        other => panic!("expected buffered data, got {:?}", other),
    }
    assert_eq!(
        decoded.crc,
        CrcState::Matched,
        "CRC mismatch at width {} len {}",
        line_width,
        data.len()
    );
    assert_eq!(decoded.header.name, "roundtrip.bin");
    assert_eq!(decoded.trailer.size, data.len() as u64);
}

#[test]
fn test_roundtrip_random_payloads() {
    for &width in &[128usize, 256] {
        for &len in &[1usize, 7, 127, 128, 129, 1000, 5000] {
            let data = pseudo_random_bytes(len, 0x2545F4914F6CDD1D ^ len as u64);
            assert_roundtrip(&data, width);
        }
    }
}

#[test]
fn test_roundtrip_all_byte_values() {
    // Every byte value appears, covering every escape decision
    let data: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
    assert_roundtrip(&data, 128);
    assert_roundtrip(&data, 256);
}

#[test]
fn test_roundtrip_critical_bytes_only() {
    // Bytes whose encodings are NUL, CR, LF, '=': worst case for escaping
    let critical_sources: Vec<u8> = vec![
        0x00u8.wrapping_sub(42),
        0x0au8.wrapping_sub(42),
        0x0du8.wrapping_sub(42),
        b'='.wrapping_sub(42),
        b'.'.wrapping_sub(42),
    ];
    let data: Vec<u8> = critical_sources.into_iter().cycle().take(640).collect();
    assert_roundtrip(&data, 128);
}

#[test]
fn test_roundtrip_multipart_crc_is_pcrc32() {
    let data = pseudo_random_bytes(300, 42);
    let encoded = yenc_encode(&data, 128, "part.bin", Some((2, 3, 301, 600)));
    let decoded = yenc_decode(&encoded).unwrap();

    assert_eq!(decoded.crc, CrcState::Matched);
    assert!(decoded.trailer.pcrc32.is_some());
    assert_eq!(decoded.part.as_ref().unwrap().begin, 301);
    assert_eq!(decoded.file_offset(), Some(300));
}
