//! # Variable-Length Integers and Field Codecs
//!
//! VarInt and VarLong store 7 data bits per byte, least significant group
//! first, with the high bit set on every byte except the last. Values are
//! interpreted as unsigned two's-complement, so negative numbers always take
//! the maximum width (5 bytes for VarInt, 10 for VarLong).
//!
//! ```text
//!        300 = 0b1_0010_1100
//!   byte 0:  1 0101100   (low 7 bits, continuation set)
//!   byte 1:  0 0000010   (remaining bits, last byte)
//! ```
//!
//! Decoding refuses to read past the maximum width. A stream that keeps the
//! continuation bit set is malicious or corrupt and fails with
//! [`ProtocolError::VarIntTooLong`] / [`ProtocolError::VarLongTooLong`].
//!
//! The [`BufExt`] and [`BufMutExt`] traits extend `bytes` buffers with the
//! field encodings used inside packet bodies. Every read checks the remaining
//! length first, so truncated input is an error rather than a panic.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{ProtocolError, Result};

/// Maximum encoded width of a VarInt
pub const MAX_VAR_INT_LEN: usize = 5;

/// Maximum encoded width of a VarLong
pub const MAX_VAR_LONG_LEN: usize = 10;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Number of bytes `value` occupies when encoded as a VarInt.
#[inline]
pub fn var_int_size(value: i32) -> usize {
    let value = value as u32;
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

/// Number of bytes `value` occupies when encoded as a VarLong.
#[inline]
pub fn var_long_size(value: i64) -> usize {
    let bits = 64 - (value as u64).leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Append `value` to `dst` as a VarInt.
pub fn encode_var_int<B: BufMut + ?Sized>(value: i32, dst: &mut B) {
    let mut value = value as u32;
    loop {
        if value & !(SEGMENT_BITS as u32) == 0 {
            dst.put_u8(value as u8);
            return;
        }
        dst.put_u8((value as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        value >>= 7;
    }
}

/// Append `value` to `dst` as a VarLong.
pub fn encode_var_long<B: BufMut + ?Sized>(value: i64, dst: &mut B) {
    let mut value = value as u64;
    loop {
        if value & !(SEGMENT_BITS as u64) == 0 {
            dst.put_u8(value as u8);
            return;
        }
        dst.put_u8((value as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        value >>= 7;
    }
}

/// Peek a VarInt at the start of `src` without consuming anything.
///
/// Returns `Ok(None)` when `src` ends before the VarInt terminates, so the
/// caller can wait for more input. On success returns the value and the number
/// of bytes it occupied.
pub fn read_var_int(src: &[u8]) -> Result<Option<(i32, usize)>> {
    let mut value: u32 = 0;
    for (i, &byte) in src.iter().take(MAX_VAR_INT_LEN).enumerate() {
        value |= ((byte & SEGMENT_BITS) as u32) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(Some((value as i32, i + 1)));
        }
    }
    if src.len() >= MAX_VAR_INT_LEN {
        Err(ProtocolError::VarIntTooLong)
    } else {
        Ok(None)
    }
}

/// Peek a VarLong at the start of `src` without consuming anything.
///
/// Same contract as [`read_var_int`] with a 10-byte bound.
pub fn read_var_long(src: &[u8]) -> Result<Option<(i64, usize)>> {
    let mut value: u64 = 0;
    for (i, &byte) in src.iter().take(MAX_VAR_LONG_LEN).enumerate() {
        value |= ((byte & SEGMENT_BITS) as u64) << (7 * i);
        if byte & CONTINUE_BIT == 0 {
            return Ok(Some((value as i64, i + 1)));
        }
    }
    if src.len() >= MAX_VAR_LONG_LEN {
        Err(ProtocolError::VarLongTooLong)
    } else {
        Ok(None)
    }
}

/// Reading side of the packet field encodings.
pub trait BufExt: Buf {
    /// Fail with `UnexpectedEof` unless at least `needed` bytes remain.
    #[inline]
    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(ProtocolError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    fn get_var_int(&mut self) -> Result<i32> {
        let mut value: u32 = 0;
        for i in 0..MAX_VAR_INT_LEN {
            self.ensure(1)?;
            let byte = self.get_u8();
            value |= ((byte & SEGMENT_BITS) as u32) << (7 * i);
            if byte & CONTINUE_BIT == 0 {
                return Ok(value as i32);
            }
        }
        Err(ProtocolError::VarIntTooLong)
    }

    fn get_var_long(&mut self) -> Result<i64> {
        let mut value: u64 = 0;
        for i in 0..MAX_VAR_LONG_LEN {
            self.ensure(1)?;
            let byte = self.get_u8();
            value |= ((byte & SEGMENT_BITS) as u64) << (7 * i);
            if byte & CONTINUE_BIT == 0 {
                return Ok(value as i64);
            }
        }
        Err(ProtocolError::VarLongTooLong)
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.get_u8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.get_i16())
    }

    fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.get_u16())
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.get_i32())
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.get_i64())
    }

    fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.get_f32())
    }

    fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8)?;
        Ok(self.get_f64())
    }

    fn read_uuid(&mut self) -> Result<u128> {
        self.ensure(16)?;
        Ok(self.get_u128())
    }

    /// VarInt byte length followed by UTF-8, capped at `max_chars` characters.
    fn read_string(&mut self, max_chars: usize) -> Result<String> {
        let length = self.get_var_int()?;
        if length < 0 {
            return Err(ProtocolError::NegativeLength(length));
        }
        let length = length as usize;
        // A char is at most 4 UTF-8 bytes.
        if length > max_chars.saturating_mul(4) {
            return Err(ProtocolError::StringTooLong {
                length,
                max: max_chars,
            });
        }
        self.ensure(length)?;
        let raw = self.copy_to_bytes(length);
        let text = std::str::from_utf8(&raw).map_err(|_| ProtocolError::InvalidString)?;
        let chars = text.chars().count();
        if chars > max_chars {
            return Err(ProtocolError::StringTooLong {
                length: chars,
                max: max_chars,
            });
        }
        Ok(text.to_owned())
    }

    /// VarInt length followed by raw bytes, capped at `max_len`.
    fn read_byte_array(&mut self, max_len: usize) -> Result<Bytes> {
        let length = self.get_var_int()?;
        if length < 0 {
            return Err(ProtocolError::NegativeLength(length));
        }
        let length = length as usize;
        if length > max_len {
            return Err(ProtocolError::FrameTooLarge(length));
        }
        self.ensure(length)?;
        Ok(self.copy_to_bytes(length))
    }
}

impl<B: Buf + ?Sized> BufExt for B {}

/// Writing side of the packet field encodings.
pub trait BufMutExt: BufMut {
    fn put_var_int(&mut self, value: i32) {
        encode_var_int(value, self);
    }

    fn put_var_long(&mut self, value: i64) {
        encode_var_long(value, self);
    }

    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_uuid(&mut self, value: u128) {
        self.put_u128(value);
    }

    fn put_string(&mut self, value: &str) {
        self.put_var_int(value.len() as i32);
        self.put_slice(value.as_bytes());
    }

    fn put_byte_array(&mut self, value: &[u8]) {
        self.put_var_int(value.len() as i32);
        self.put_slice(value);
    }
}

impl<B: BufMut + ?Sized> BufMutExt for B {}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encoded(value: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_var_int(value, &mut buf);
        buf
    }

    #[test]
    fn test_known_var_int_vectors() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(255), vec![0xff, 0x01]);
        assert_eq!(encoded(25565), vec![0xdd, 0xc7, 0x01]);
        assert_eq!(encoded(2_097_151), vec![0xff, 0xff, 0x7f]);
        assert_eq!(encoded(i32::MAX), vec![0xff, 0xff, 0xff, 0xff, 0x07]);
        assert_eq!(encoded(-1), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(encoded(i32::MIN), vec![0x80, 0x80, 0x80, 0x80, 0x08]);
    }

    #[test]
    fn test_size_steps_at_seven_bit_boundaries() {
        for (boundary, width) in [(128, 2), (16_384, 3), (2_097_152, 4), (268_435_456, 5)] {
            assert_eq!(var_int_size(boundary - 1), width - 1);
            assert_eq!(var_int_size(boundary), width);
            assert_eq!(encoded(boundary).len(), width);
        }
        assert_eq!(var_int_size(-1), 5);
    }

    #[test]
    fn test_var_long_sizes() {
        assert_eq!(var_long_size(0), 1);
        assert_eq!(var_long_size(127), 1);
        assert_eq!(var_long_size(128), 2);
        assert_eq!(var_long_size(i64::MAX), 9);
        assert_eq!(var_long_size(-1), 10);
        let mut buf = Vec::new();
        encode_var_long(-1, &mut buf);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_peek_needs_more_input() {
        assert!(read_var_int(&[]).unwrap().is_none());
        assert!(read_var_int(&[0x80]).unwrap().is_none());
        assert!(read_var_int(&[0x80, 0x80, 0x80, 0x80]).unwrap().is_none());
        assert_eq!(read_var_int(&[0xdd, 0xc7, 0x01, 0xff]).unwrap(), Some((25565, 3)));
    }

    #[test]
    fn test_var_int_too_long() {
        let six = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(matches!(read_var_int(&six), Err(ProtocolError::VarIntTooLong)));
        let mut buf = &six[..];
        assert!(matches!(buf.get_var_int(), Err(ProtocolError::VarIntTooLong)));
    }

    #[test]
    fn test_var_long_too_long() {
        let eleven = [0x80u8; 11];
        assert!(matches!(read_var_long(&eleven), Err(ProtocolError::VarLongTooLong)));
        let mut buf = &eleven[..];
        assert!(matches!(buf.get_var_long(), Err(ProtocolError::VarLongTooLong)));
    }

    #[test]
    fn test_var_long_extremes() {
        for value in [0i64, 1, -1, i64::MAX, i64::MIN, 1 << 35] {
            let mut buf = BytesMut::new();
            buf.put_var_long(value);
            assert_eq!(read_var_long(&buf).unwrap(), Some((value, buf.len())));
            let mut frozen = buf.freeze();
            assert_eq!(frozen.get_var_long().unwrap(), value);
        }
    }

    #[test]
    fn test_truncated_reads_are_errors() {
        let mut buf = &[0x00u8, 0x01][..];
        assert!(matches!(
            buf.read_i32(),
            Err(ProtocolError::UnexpectedEof {
                needed: 4,
                remaining: 2
            })
        ));
        let mut empty = &[][..];
        assert!(matches!(
            empty.get_var_int(),
            Err(ProtocolError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_string_roundtrip_and_limits() {
        let mut buf = BytesMut::new();
        buf.put_string("héllo");
        let mut frozen = buf.clone().freeze();
        assert_eq!(frozen.read_string(16).unwrap(), "héllo");

        let mut short = buf.freeze();
        assert!(matches!(
            short.read_string(3),
            Err(ProtocolError::StringTooLong { .. })
        ));

        let mut bad = BytesMut::new();
        bad.put_var_int(2);
        bad.put_slice(&[0xc3, 0x28]);
        assert!(matches!(
            bad.freeze().read_string(16),
            Err(ProtocolError::InvalidString)
        ));
    }

    #[test]
    fn test_negative_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_var_int(-5);
        assert!(matches!(
            buf.freeze().read_byte_array(64),
            Err(ProtocolError::NegativeLength(-5))
        ));
    }
}
