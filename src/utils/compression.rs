//! # Compression Stage
//!
//! Threshold-based frame compression. Once installed, every frame body is
//! prefixed with a VarInt "data length":
//!
//! ```text
//! body >= threshold:  VarInt(uncompressed_len) ++ compressed(payload)
//! body <  threshold:  VarInt(0)                ++ payload
//! ```
//!
//! A data length of zero therefore means "sent uncompressed". On the read
//! side a non-zero data length must match the inflated size exactly, and is
//! bounded by `max_uncompressed_size` before any inflation happens so a small
//! frame cannot claim gigabytes of output.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::config::MAX_UNCOMPRESSED_SIZE;
use crate::core::varint::{read_var_int, var_int_size, BufMutExt};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Zlib,
    Lz4,
    Zstd,
}

impl CompressionKind {
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::Zlib => "zlib",
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }

    /// Inclusive range of accepted compression levels
    pub fn level_range(self) -> (i32, i32) {
        match self {
            CompressionKind::Zlib => (0, 9),
            // lz4_flex has a single level; any value is accepted and ignored
            CompressionKind::Lz4 => (i32::MIN, i32::MAX),
            CompressionKind::Zstd => (1, 22),
        }
    }
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind, level: i32) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Zlib => {
            let level = flate2::Compression::new(level.clamp(0, 9) as u32);
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
            encoder
                .write_all(data)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            encoder.finish().map_err(|_| ProtocolError::CompressionFailure)
        }
        CompressionKind::Lz4 => Ok(lz4_flex::compress(data)),
        CompressionKind::Zstd => zstd::bulk::compress(data, level.clamp(1, 22))
            .map_err(|_| ProtocolError::CompressionFailure),
    }
}

/// Decompresses data, never producing more than `limit` bytes.
///
/// Returns whatever was inflated up to `limit + 1` bytes so callers can detect
/// both short and oversized output.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if the input is malformed
pub fn decompress(data: &[u8], kind: CompressionKind, limit: usize) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Zlib => {
            let mut out = Vec::new();
            flate2::read::ZlibDecoder::new(data)
                .take(limit as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            Ok(out)
        }
        CompressionKind::Lz4 => {
            // The block format carries no size, so the declared length is the
            // output capacity; anything that does not fit is malformed.
            lz4_flex::decompress(data, limit).map_err(|_| ProtocolError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            let mut reader = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;

            // Read in chunks to enforce size limit
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > limit {
                            break;
                        }
                    }
                    Err(_) => return Err(ProtocolError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

/// Frame-level compression stage of a connection pipeline.
#[derive(Debug, Clone)]
pub struct CompressionStage {
    threshold: usize,
    kind: CompressionKind,
    level: i32,
    max_uncompressed_size: usize,
}

impl CompressionStage {
    pub fn new(threshold: usize, kind: CompressionKind, level: i32) -> Self {
        Self {
            threshold,
            kind,
            level,
            max_uncompressed_size: MAX_UNCOMPRESSED_SIZE,
        }
    }

    pub fn with_max_uncompressed_size(mut self, max: usize) -> Self {
        self.max_uncompressed_size = max;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Adjust the threshold without reinstalling the stage.
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// Wrap an outgoing frame body with its data-length prefix.
    ///
    /// Returns the wrapped body and whether it was compressed.
    pub fn encode(&self, body: BytesMut) -> Result<(BytesMut, bool)> {
        // a zero data length marks a raw body, so empty bodies are never compressed
        if body.is_empty() || body.len() < self.threshold {
            let mut out = BytesMut::with_capacity(body.len() + 1);
            out.put_var_int(0);
            out.unsplit(body);
            return Ok((out, false));
        }

        let compressed = compress(&body, self.kind, self.level)?;
        let mut out = BytesMut::with_capacity(var_int_size(body.len() as i32) + compressed.len());
        out.put_var_int(body.len() as i32);
        out.put_slice(&compressed);
        Ok((out, true))
    }

    /// Unwrap an incoming frame body.
    pub fn decode(&self, mut frame: BytesMut) -> Result<BytesMut> {
        let (declared, prefix) = match read_var_int(&frame)? {
            Some(parsed) => parsed,
            None => {
                return Err(ProtocolError::UnexpectedEof {
                    needed: frame.len() + 1,
                    remaining: frame.len(),
                })
            }
        };
        frame.advance(prefix);

        if declared == 0 {
            return Ok(frame);
        }
        if declared < 0 {
            return Err(ProtocolError::NegativeLength(declared));
        }

        let declared = declared as usize;
        if declared < self.threshold {
            return Err(ProtocolError::BelowCompressionThreshold {
                declared,
                threshold: self.threshold,
            });
        }
        if declared > self.max_uncompressed_size {
            return Err(ProtocolError::FrameTooLarge(declared));
        }

        let inflated = decompress(&frame, self.kind, declared)?;
        if inflated.len() != declared {
            return Err(ProtocolError::CompressionMismatch {
                declared,
                actual: inflated.len(),
            });
        }
        Ok(BytesMut::from(&inflated[..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(len: usize) -> BytesMut {
        BytesMut::from(&vec![0x41u8; len][..])
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let original = b"Hello, World! Hello, World! Hello, World! Hello, World!";
        for kind in [CompressionKind::Zlib, CompressionKind::Lz4, CompressionKind::Zstd] {
            let compressed = compress(original, kind, 6).unwrap();
            let decompressed = decompress(&compressed, kind, original.len()).unwrap();
            assert_eq!(original.as_slice(), decompressed.as_slice(), "{}", kind.name());
        }
    }

    #[test]
    fn test_threshold_minus_one_is_sent_raw() {
        let stage = CompressionStage::new(64, CompressionKind::Zlib, 6);
        let (wire, compressed) = stage.encode(body(63)).unwrap();
        assert!(!compressed);
        assert_eq!(wire[0], 0x00);
        assert_eq!(&wire[1..], &body(63)[..]);
        assert_eq!(stage.decode(wire).unwrap(), body(63));
    }

    #[test]
    fn test_threshold_exact_is_compressed() {
        let stage = CompressionStage::new(64, CompressionKind::Zlib, 6);
        let (wire, compressed) = stage.encode(body(64)).unwrap();
        assert!(compressed);
        assert_eq!(read_var_int(&wire).unwrap(), Some((64, 1)));
        assert_eq!(stage.decode(wire).unwrap(), body(64));
    }

    #[test]
    fn test_declared_length_mismatch() {
        let stage = CompressionStage::new(16, CompressionKind::Zlib, 6);
        let compressed = compress(&[7u8; 100], CompressionKind::Zlib, 6).unwrap();
        let mut wire = BytesMut::new();
        wire.put_var_int(120);
        wire.put_slice(&compressed);
        assert!(matches!(
            stage.decode(wire),
            Err(ProtocolError::CompressionMismatch {
                declared: 120,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_declared_below_threshold_rejected() {
        let stage = CompressionStage::new(256, CompressionKind::Zlib, 6);
        let compressed = compress(&[1u8; 10], CompressionKind::Zlib, 6).unwrap();
        let mut wire = BytesMut::new();
        wire.put_var_int(10);
        wire.put_slice(&compressed);
        assert!(matches!(
            stage.decode(wire),
            Err(ProtocolError::BelowCompressionThreshold {
                declared: 10,
                threshold: 256
            })
        ));
    }

    #[test]
    fn test_decompression_bomb_rejected_before_inflating() {
        let stage =
            CompressionStage::new(16, CompressionKind::Zlib, 6).with_max_uncompressed_size(1024);
        let mut wire = BytesMut::new();
        wire.put_var_int(1_000_000);
        wire.put_slice(&[0x78, 0x9c, 0x03, 0x00]);
        assert!(matches!(
            stage.decode(wire),
            Err(ProtocolError::FrameTooLarge(1_000_000))
        ));
    }

    #[test]
    fn test_malformed_compressed_data() {
        for kind in [CompressionKind::Zlib, CompressionKind::Zstd, CompressionKind::Lz4] {
            let result = decompress(&[0xff, 0xff, 0xff, 0xff, 0xff], kind, 64);
            assert!(result.is_err(), "{} accepted garbage", kind.name());
        }
    }

    #[test]
    fn test_empty_frame_is_truncated() {
        let stage = CompressionStage::new(16, CompressionKind::Zlib, 6);
        assert!(matches!(
            stage.decode(BytesMut::new()),
            Err(ProtocolError::UnexpectedEof { .. })
        ));
    }
}
