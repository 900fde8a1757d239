//! Property-based tests using proptest
//!
//! These tests check the wire invariants of the codec layers across a wide
//! range of randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use protocol_session::core::codec::LengthFramer;
use protocol_session::core::pipeline::{Pipeline, Stage, FRAMER};
use protocol_session::core::varint::{
    encode_var_int, encode_var_long, read_var_int, read_var_long, var_int_size, var_long_size,
};
use protocol_session::utils::compression::{compress, decompress, CompressionKind, CompressionStage};
use protocol_session::utils::crypto::CipherStage;
use proptest::prelude::*;

// Property: every i32 survives a VarInt roundtrip in the predicted size
proptest! {
    #[test]
    fn prop_var_int_roundtrip(value in any::<i32>()) {
        let mut buf = BytesMut::new();
        encode_var_int(value, &mut buf);

        prop_assert_eq!(buf.len(), var_int_size(value));
        prop_assert!(buf.len() <= 5);
        let (decoded, used) = read_var_int(&buf).unwrap().expect("complete VarInt");
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(used, buf.len());
    }
}

// Property: a truncated VarInt asks for more input instead of failing
proptest! {
    #[test]
    fn prop_truncated_var_int_is_incomplete(value in any::<i32>()) {
        let mut buf = BytesMut::new();
        encode_var_int(value, &mut buf);
        for cut in 0..buf.len() {
            prop_assert!(read_var_int(&buf[..cut]).unwrap().is_none());
        }
    }
}

proptest! {
    #[test]
    fn prop_var_long_roundtrip(value in any::<i64>()) {
        let mut buf = BytesMut::new();
        encode_var_long(value, &mut buf);

        prop_assert_eq!(buf.len(), var_long_size(value));
        let (decoded, used) = read_var_long(&buf).unwrap().expect("complete VarLong");
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(used, buf.len());
    }
}

// Property: the raw compressors are lossless for every kind
proptest! {
    #[test]
    fn prop_compression_roundtrip(
        data in prop::collection::vec(any::<u8>(), 0..20000),
        kind in prop_oneof![
            Just(CompressionKind::Zlib),
            Just(CompressionKind::Lz4),
            Just(CompressionKind::Zstd),
        ],
    ) {
        let compressed = compress(&data, kind, 3).expect("Compression should not fail");
        let decompressed = decompress(&compressed, kind, data.len().max(1)).expect("Decompression should not fail");
        prop_assert_eq!(decompressed, data);
    }
}

// Property: the compression stage compresses exactly the bodies at or above
// the threshold and always restores the original
proptest! {
    #[test]
    fn prop_compression_stage_threshold(
        body in prop::collection::vec(any::<u8>(), 0..4096),
        threshold in 0usize..2048,
    ) {
        let stage = CompressionStage::new(threshold, CompressionKind::Zlib, 6);
        let (wrapped, compressed) = stage.encode(BytesMut::from(&body[..])).unwrap();

        prop_assert_eq!(compressed, !body.is_empty() && body.len() >= threshold);
        let restored = stage.decode(wrapped).unwrap();
        prop_assert_eq!(&restored[..], &body[..]);
    }
}

// Property: a full pipeline delivers the same frames in the same order no
// matter how the wire bytes are chunked
proptest! {
    #[test]
    fn prop_pipeline_chunking_is_transparent(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..600), 1..12),
        chunk in 1usize..97,
        key in prop::array::uniform16(any::<u8>()),
    ) {
        let build = || {
            let mut pipeline = Pipeline::new(LengthFramer::default());
            pipeline
                .add_after(FRAMER, Stage::Compression(CompressionStage::new(128, CompressionKind::Zlib, 6)))
                .unwrap();
            pipeline
                .add_before(FRAMER, Stage::Cipher(CipherStage::new(&key).unwrap()))
                .unwrap();
            pipeline
        };
        let mut writer = build();
        let mut reader = build();

        let mut wire = BytesMut::new();
        for payload in &payloads {
            writer.encode(BytesMut::from(&payload[..]), &mut wire).unwrap();
        }

        let mut received = Vec::new();
        let mut src = BytesMut::new();
        for piece in wire.chunks(chunk) {
            src.extend_from_slice(piece);
            while let Some(frame) = reader.decode(&mut src).unwrap() {
                received.push(frame.to_vec());
            }
        }
        prop_assert_eq!(received, payloads);
        prop_assert!(!reader.has_pending());
    }
}

// Property: arbitrary input never panics the decoding pipeline
proptest! {
    #[test]
    fn prop_garbage_never_panics(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut pipeline = Pipeline::new(LengthFramer::new(4096));
        pipeline
            .add_after(FRAMER, Stage::Compression(CompressionStage::new(64, CompressionKind::Zlib, 6)))
            .unwrap();
        let mut src = BytesMut::from(&data[..]);
        for _ in 0..64 {
            match pipeline.decode(&mut src) {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
}
