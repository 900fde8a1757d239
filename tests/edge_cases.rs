#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions and malformed input across the codec layers.

use bytes::{Bytes, BytesMut};
use protocol_session::config::MAX_STRING_LENGTH;
use protocol_session::core::codec::LengthFramer;
use protocol_session::core::pipeline::{Pipeline, Stage, CIPHER, COMPRESSION, FRAMER};
use protocol_session::core::varint::{read_var_int, BufExt, BufMutExt};
use protocol_session::error::ProtocolError;
use protocol_session::utils::compression::{compress, CompressionKind, CompressionStage};
use protocol_session::utils::crypto::CipherStage;
use protocol_session::utils::timeout::with_timeout;
use std::time::Duration;

const KEY: [u8; 16] = [0x42; 16];

// ============================================================================
// VARINT EDGE CASES
// ============================================================================

#[test]
fn test_var_int_known_encodings() {
    let cases: [(i32, &[u8]); 6] = [
        (0, &[0x00]),
        (127, &[0x7F]),
        (128, &[0x80, 0x01]),
        (25565, &[0xDD, 0xC7, 0x01]),
        (2_147_483_647, &[0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
        (-1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
    ];
    for (value, bytes) in cases {
        let mut buf = BytesMut::new();
        buf.put_var_int(value);
        assert_eq!(&buf[..], bytes, "encoding {value}");
        assert_eq!(read_var_int(bytes).unwrap(), Some((value, bytes.len())));
    }
}

#[test]
fn test_var_int_sixth_byte_is_rejected() {
    let err = read_var_int(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]).unwrap_err();
    assert!(matches!(err, ProtocolError::VarIntTooLong));

    let mut src = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    assert!(matches!(src.get_var_int(), Err(ProtocolError::VarIntTooLong)));
}

#[test]
fn test_var_int_empty_input_needs_more() {
    assert_eq!(read_var_int(&[]).unwrap(), None);
    let mut src = Bytes::new();
    assert!(matches!(
        src.get_var_int(),
        Err(ProtocolError::UnexpectedEof { needed: 1, remaining: 0 })
    ));
}

// ============================================================================
// STRING AND ARRAY EDGE CASES
// ============================================================================

#[test]
fn test_string_at_limit_is_accepted() {
    let text = "x".repeat(16);
    let mut buf = BytesMut::new();
    buf.put_string(&text);
    let mut src = buf.freeze();
    assert_eq!(src.read_string(16).unwrap(), text);
}

#[test]
fn test_string_over_limit_is_rejected() {
    let mut buf = BytesMut::new();
    buf.put_string(&"x".repeat(17));
    let mut src = buf.freeze();
    assert!(matches!(
        src.read_string(16),
        Err(ProtocolError::StringTooLong { length: 17, max: 16 })
    ));
}

#[test]
fn test_multibyte_string_counts_characters() {
    // four characters, twelve bytes
    let text = "日本語だ";
    let mut buf = BytesMut::new();
    buf.put_string(text);
    let mut src = buf.freeze();
    assert_eq!(src.read_string(4).unwrap(), text);
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let mut buf = BytesMut::new();
    buf.put_var_int(2);
    buf.extend_from_slice(&[0xC3, 0x28]);
    let mut src = buf.freeze();
    assert!(matches!(
        src.read_string(MAX_STRING_LENGTH),
        Err(ProtocolError::InvalidString)
    ));
}

#[test]
fn test_negative_string_length_is_rejected() {
    let mut buf = BytesMut::new();
    buf.put_var_int(-5);
    let mut src = buf.freeze();
    assert!(matches!(
        src.read_string(MAX_STRING_LENGTH),
        Err(ProtocolError::NegativeLength(-5))
    ));
}

#[test]
fn test_truncated_byte_array() {
    let mut buf = BytesMut::new();
    buf.put_var_int(10);
    buf.extend_from_slice(&[1, 2, 3]);
    let mut src = buf.freeze();
    assert!(matches!(
        src.read_byte_array(64),
        Err(ProtocolError::UnexpectedEof { needed: 10, remaining: 3 })
    ));
}

// ============================================================================
// FRAMING EDGE CASES
// ============================================================================

#[test]
fn test_empty_frame_body_is_framed() {
    let framer = LengthFramer::default();
    let mut buf = BytesMut::from(&[0x00][..]);
    let body = framer.decode(&mut buf).unwrap().unwrap();
    assert!(body.is_empty());
    assert!(buf.is_empty());
}

#[test]
fn test_negative_frame_length() {
    let framer = LengthFramer::default();
    let mut buf = BytesMut::from(&[0xFF, 0xFF, 0xFF, 0xFF, 0x0F][..]);
    assert!(matches!(
        framer.decode(&mut buf),
        Err(ProtocolError::NegativeLength(-1))
    ));
}

#[test]
fn test_frame_at_limit_is_accepted() {
    let framer = LengthFramer::new(300);
    let mut buf = BytesMut::new();
    framer.encode(&[5u8; 300], &mut buf).unwrap();
    assert_eq!(framer.decode(&mut buf).unwrap().unwrap().len(), 300);

    assert!(matches!(
        framer.encode(&[5u8; 301], &mut buf),
        Err(ProtocolError::FrameTooLarge(301))
    ));
}

#[test]
fn test_incomplete_prefix_leaves_buffer_untouched() {
    let framer = LengthFramer::default();
    let mut buf = BytesMut::from(&[0x80, 0x80][..]);
    assert!(framer.decode(&mut buf).unwrap().is_none());
    assert_eq!(&buf[..], &[0x80, 0x80]);
}

// ============================================================================
// COMPRESSION EDGE CASES
// ============================================================================

#[test]
fn test_declared_length_mismatch() {
    let stage = CompressionStage::new(16, CompressionKind::Zlib, 6);
    let data = vec![9u8; 100];
    let mut frame = BytesMut::new();
    frame.put_var_int(120);
    frame.extend_from_slice(&compress(&data, CompressionKind::Zlib, 6).unwrap());

    assert!(matches!(
        stage.decode(frame),
        Err(ProtocolError::CompressionMismatch { declared: 120, actual: 100 })
    ));
}

#[test]
fn test_declared_length_below_threshold() {
    let stage = CompressionStage::new(256, CompressionKind::Zlib, 6);
    let data = vec![9u8; 100];
    let mut frame = BytesMut::new();
    frame.put_var_int(100);
    frame.extend_from_slice(&compress(&data, CompressionKind::Zlib, 6).unwrap());

    let err = stage.decode(frame).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::BelowCompressionThreshold { declared: 100, threshold: 256 }
    ));
    assert!(err.is_peer_violation());
}

#[test]
fn test_declared_length_above_limit() {
    let stage = CompressionStage::new(16, CompressionKind::Zlib, 6).with_max_uncompressed_size(1024);
    let mut frame = BytesMut::new();
    frame.put_var_int(4096);
    frame.extend_from_slice(&compress(&[0u8; 4096], CompressionKind::Zlib, 6).unwrap());
    assert!(matches!(stage.decode(frame), Err(ProtocolError::FrameTooLarge(4096))));
}

#[test]
fn test_corrupted_compressed_body() {
    let stage = CompressionStage::new(16, CompressionKind::Zlib, 6);
    let mut frame = BytesMut::new();
    frame.put_var_int(64);
    frame.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11]);
    assert!(matches!(
        stage.decode(frame),
        Err(ProtocolError::DecompressionFailure)
    ));
}

#[test]
fn test_every_kind_roundtrips_through_stage() {
    for kind in [CompressionKind::Zlib, CompressionKind::Lz4, CompressionKind::Zstd] {
        let stage = CompressionStage::new(32, kind, 3);
        let body = BytesMut::from(&b"abcdefgh".repeat(40)[..]);
        let (wrapped, compressed) = stage.encode(body.clone()).unwrap();
        assert!(compressed, "{}", kind.name());
        assert_eq!(stage.decode(wrapped).unwrap(), body, "{}", kind.name());
    }
}

// ============================================================================
// CIPHER EDGE CASES
// ============================================================================

#[test]
fn test_cipher_rejects_wrong_key_length() {
    for len in [0usize, 15, 17, 32] {
        assert!(matches!(
            CipherStage::new(&vec![0u8; len]),
            Err(ProtocolError::InvalidKeyLength(l)) if l == len
        ));
    }
}

#[test]
fn test_cipher_is_a_stream() {
    // splitting the input must not change the output
    let plain = b"the quick brown fox jumps over the lazy dog".to_vec();

    let mut whole = plain.clone();
    CipherStage::new(&KEY).unwrap().encrypt(&mut whole);

    let mut pieces = plain.clone();
    let mut cipher = CipherStage::new(&KEY).unwrap();
    let (head, tail) = pieces.split_at_mut(7);
    cipher.encrypt(head);
    cipher.encrypt(tail);

    assert_eq!(whole, pieces);
    assert_ne!(whole, plain);

    let mut reader = CipherStage::new(&KEY).unwrap();
    for byte in whole.chunks_mut(1) {
        reader.decrypt(byte);
    }
    assert_eq!(whole, plain);
}

// ============================================================================
// PIPELINE EDGE CASES
// ============================================================================

#[test]
fn test_pipeline_rejects_second_cipher() {
    let mut pipeline = Pipeline::default();
    pipeline
        .add_before(FRAMER, Stage::Cipher(CipherStage::new(&KEY).unwrap()))
        .unwrap();
    assert!(matches!(
        pipeline.add_before(FRAMER, Stage::Cipher(CipherStage::new(&KEY).unwrap())),
        Err(ProtocolError::ConfigError(_))
    ));
    assert_eq!(pipeline.names(), vec![CIPHER, FRAMER]);
}

#[test]
fn test_compression_cannot_sit_on_socket_side() {
    let mut pipeline = Pipeline::default();
    let stage = Stage::Compression(CompressionStage::new(64, CompressionKind::Zlib, 6));
    assert!(matches!(
        pipeline.add_before(FRAMER, stage),
        Err(ProtocolError::StageOrder(_))
    ));
    assert!(!pipeline.contains(COMPRESSION));
}

#[test]
fn test_removing_missing_stage_is_none() {
    let mut pipeline = Pipeline::default();
    assert!(pipeline.remove(COMPRESSION).unwrap().is_none());
    assert!(matches!(
        pipeline.add_after("nope", Stage::Compression(CompressionStage::new(1, CompressionKind::Zlib, 6))),
        Err(ProtocolError::StageNotFound(_))
    ));
}

#[test]
fn test_compression_removed_mid_stream() {
    let mut writer = Pipeline::default();
    let mut reader = Pipeline::default();
    for pipeline in [&mut writer, &mut reader] {
        pipeline
            .add_after(FRAMER, Stage::Compression(CompressionStage::new(8, CompressionKind::Zlib, 6)))
            .unwrap();
    }

    let mut wire = BytesMut::new();
    writer.encode(BytesMut::from(&[1u8; 64][..]), &mut wire).unwrap();
    assert_eq!(reader.decode(&mut wire).unwrap().unwrap().len(), 64);

    writer.remove(COMPRESSION).unwrap().unwrap();
    reader.remove(COMPRESSION).unwrap().unwrap();
    writer.encode(BytesMut::from(&[2u8; 64][..]), &mut wire).unwrap();
    assert_eq!(wire[0] as usize, 64);
    assert_eq!(reader.decode(&mut wire).unwrap().unwrap().len(), 64);
}

// ============================================================================
// TIMEOUT EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_timeout_immediate_complete() {
    let result = with_timeout(Duration::from_secs(10), async { "done" }).await;
    assert_eq!(result.unwrap(), "done");
}

#[tokio::test]
async fn test_timeout_exceeds_duration() {
    let result = with_timeout(Duration::from_millis(10), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
    })
    .await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}
