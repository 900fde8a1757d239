//! # Core Protocol Components
//!
//! Low-level primitives: VarInt codecs, the packet abstraction, framing and
//! the per-connection stage pipeline.
//!
//! ## Components
//! - **VarInt**: variable-length integers and field helpers
//! - **Packet**: the `Packet` trait and registration descriptors
//! - **Codec**: length framing and the tokio codec for `Framed` transports
//! - **Pipeline**: ordered cipher / framer / compression stages
//!
//! ## Wire Format
//! ```text
//! [VarInt length] [VarInt data length, if compressed] [VarInt id] [fields]
//! ```
//!
//! ## Security
//! - Maximum frame size: 2 MiB - 1 (fits a three-byte VarInt)
//! - Length validation before buffering
//! - Declared uncompressed size is bounded before inflating

pub mod codec;
pub mod packet;
pub mod pipeline;
pub mod varint;
