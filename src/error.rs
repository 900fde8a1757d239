//! # Error Types
//!
//! Error handling for the wire protocol and connection sessions.
//!
//! Every failure in this crate is a [`ProtocolError`]. The variants fall into
//! four categories, and callers are expected to react to each differently:
//!
//! ## Error Categories
//! - **Configuration errors**: duplicate registrations, sending an unregistered
//!   packet type. These are programming mistakes and are never swallowed.
//! - **Peer protocol violations**: unknown inbound ids, frame size violations,
//!   trailing bytes, VarInt overflow, decompression mismatch. These close the
//!   offending connection only.
//! - **Transient I/O failures**: write failures and resets. These close the
//!   connection with the underlying cause as the reason.
//! - **Liveness failures**: keepalive timeouts, handled like peer violations.
//!
//! ## Example Usage
//! ```rust
//! use protocol_session::error::{ProtocolError, Result};
//! use protocol_session::core::varint::read_var_int;
//!
//! fn first_length(bytes: &[u8]) -> Result<i32> {
//!     let (value, _consumed) = read_var_int(bytes)?.ok_or(ProtocolError::UnexpectedEof {
//!         needed: 1,
//!         remaining: 0,
//!     })?;
//!     Ok(value)
//! }
//!
//! assert_eq!(first_length(&[0x2a]).unwrap(), 42);
//! ```

use crate::core::packet::Direction;
use crate::protocol::phase::ProtocolPhase;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Disconnect reasons surfaced to listeners
    pub const REASON_TIMED_OUT: &str = "Timed out";
    pub const REASON_CONNECTION_CLOSED: &str = "Connection closed";
    pub const REASON_END_OF_STREAM: &str = "End of stream";
    pub const REASON_SERVER_SHUTDOWN: &str = "Server shutting down";

    /// Pipeline errors
    pub const ERR_CIPHER_AFTER_FRAMER: &str = "Byte stages must be placed before the framer";
    pub const ERR_COMPRESSION_BEFORE_FRAMER: &str = "Frame stages must be placed after the framer";

    /// Session errors
    pub const ERR_DRIVER_GONE: &str = "Session driver is no longer running";
    pub const ERR_ALREADY_RUNNING: &str = "Session driver was already started";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("VarInt is too long (more than 5 bytes)")]
    VarIntTooLong,

    #[error("VarLong is too long (more than 10 bytes)")]
    VarLongTooLong,

    #[error("Unexpected end of packet: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("String of {length} characters exceeds maximum of {max}")]
    StringTooLong { length: usize, max: usize },

    #[error("String is not valid UTF-8")]
    InvalidString,

    #[error("Negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("Packet id {id:#04x} is already registered for {phase:?}/{direction:?} (by {existing})")]
    DuplicateRegistration {
        phase: ProtocolPhase,
        direction: Direction,
        id: i32,
        existing: &'static str,
    },

    #[error("Packet type {0} is registered more than once")]
    DuplicateType(&'static str),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(&'static str),

    #[error("Unknown packet id {id:#04x} for {phase:?}/{direction:?}")]
    UnknownPacketId {
        phase: ProtocolPhase,
        direction: Direction,
        id: i32,
    },

    #[error("Frame for {packet} has {size} field bytes, allowed range is [{min}, {max}]")]
    FrameSizeOutOfBounds {
        packet: &'static str,
        size: usize,
        min: usize,
        max: usize,
    },

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Frame is empty and cannot carry a packet id")]
    EmptyFrame,

    #[error("{packet} left {remaining} trailing bytes after decoding")]
    TrailingBytes {
        packet: &'static str,
        remaining: usize,
    },

    #[error("Compressed frame declared {declared} bytes but inflated to {actual}")]
    CompressionMismatch { declared: usize, actual: usize },

    #[error("Compressed frame of {declared} bytes is below the threshold of {threshold}")]
    BelowCompressionThreshold { declared: usize, threshold: usize },

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Invalid encryption key length: {0} bytes (expected 16)")]
    InvalidKeyLength(usize),

    #[error("Encryption is already enabled on this connection")]
    EncryptionAlreadyEnabled,

    #[error("Pipeline stage not found: {0}")]
    StageNotFound(String),

    #[error("Invalid pipeline order: {0}")]
    StageOrder(&'static str),

    #[error("Pipeline stage cannot be removed: {0}")]
    StagePinned(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error was caused by the remote peer sending malformed or
    /// unexpected data. These close the connection but never the process.
    pub fn is_peer_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::VarIntTooLong
                | ProtocolError::VarLongTooLong
                | ProtocolError::UnexpectedEof { .. }
                | ProtocolError::StringTooLong { .. }
                | ProtocolError::InvalidString
                | ProtocolError::NegativeLength(_)
                | ProtocolError::UnknownPacketId { .. }
                | ProtocolError::FrameSizeOutOfBounds { .. }
                | ProtocolError::FrameTooLarge(_)
                | ProtocolError::EmptyFrame
                | ProtocolError::TrailingBytes { .. }
                | ProtocolError::CompressionMismatch { .. }
                | ProtocolError::BelowCompressionThreshold { .. }
                | ProtocolError::DecompressionFailure
                | ProtocolError::Timeout
        )
    }

    /// Whether this error is a programming or startup mistake that should fail fast.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProtocolError::DuplicateRegistration { .. }
                | ProtocolError::DuplicateType(_)
                | ProtocolError::UnknownPacketType(_)
                | ProtocolError::StageNotFound(_)
                | ProtocolError::StageOrder(_)
                | ProtocolError::StagePinned(_)
                | ProtocolError::InvalidKeyLength(_)
                | ProtocolError::EncryptionAlreadyEnabled
                | ProtocolError::ConfigError(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_disjoint() {
        let peer = ProtocolError::UnknownPacketId {
            phase: ProtocolPhase::Play,
            direction: Direction::Inbound,
            id: 0x7f,
        };
        assert!(peer.is_peer_violation());
        assert!(!peer.is_configuration());

        let config = ProtocolError::UnknownPacketType("Foo");
        assert!(config.is_configuration());
        assert!(!config.is_peer_violation());

        let io = ProtocolError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "reset"));
        assert!(!io.is_peer_violation());
        assert!(!io.is_configuration());
    }

    #[test]
    fn test_display_mentions_ids_in_hex() {
        let err = ProtocolError::UnknownPacketId {
            phase: ProtocolPhase::Handshake,
            direction: Direction::Inbound,
            id: 0x21,
        };
        assert!(err.to_string().contains("0x21"));
    }
}
