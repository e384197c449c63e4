//! Golden wire vectors and framing across arbitrary read boundaries.

use canopy_core::{frame, limits, CborCodec, Message};
use canopy_testkit::vectors::{all_vectors, verify_all_vectors};
use proptest::prelude::*;

#[test]
fn test_golden_vectors() {
    let failed = verify_all_vectors();
    assert!(failed.is_empty(), "vectors failed: {:?}", failed);
}

#[test]
fn test_vectors_concatenated_frame_in_order() {
    let codec = CborCodec::new();
    let vectors = all_vectors();
    let stream: Vec<u8> = vectors
        .iter()
        .flat_map(|v| hex_decode(v.expected_hex))
        .collect();

    let mut offset = 0;
    for vector in &vectors {
        let f = frame(&stream[offset..], limits::DEFAULT_MAX_FRAME_LEN)
            .unwrap()
            .unwrap();
        let decoded = Message::decode(&f, &stream[offset..], &codec).unwrap();
        assert_eq!(decoded, vector.message, "{}", vector.name);
        offset += f.total_len;
    }
    assert_eq!(offset, stream.len());
}

fn hex_decode(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

proptest! {
    /// However the bytes are split, no frame is reported before it is
    /// complete, and every frame is found once it is.
    #[test]
    fn prop_split_reads_frame_identically(split in 0usize..200) {
        let stream: Vec<u8> = all_vectors().iter().flat_map(|v| hex_decode(v.expected_hex)).collect();
        let split = split.min(stream.len());
        let mut buf = stream[..split].to_vec();
        let mut frames = 0;
        let mut consumed = 0;
        let mut fed = split;
        loop {
            match frame(&buf[consumed..], limits::DEFAULT_MAX_FRAME_LEN).unwrap() {
                Some(f) => {
                    prop_assert!(consumed + f.total_len <= buf.len());
                    consumed += f.total_len;
                    frames += 1;
                }
                None if fed < stream.len() => {
                    buf.push(stream[fed]);
                    fed += 1;
                }
                None => break,
            }
        }
        prop_assert_eq!(frames, all_vectors().len());
        prop_assert_eq!(consumed, stream.len());
    }
}
