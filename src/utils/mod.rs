//! # Utility Modules
//!
//! Pipeline stages and supporting utilities.
//!
//! ## Components
//! - **Crypto**: AES-128/CFB8 stream cipher stage
//! - **Compression**: threshold-based zlib, LZ4 and Zstd frame compression
//! - **Logging**: structured logging configuration
//! - **Timeout**: async timeout wrappers and protocol timing defaults
//! - **Metrics**: thread-safe observability counters
//!
//! ## Security
//! - Decompression bomb protection (declared size checked before inflating)
//! - Memory zeroing for key material (zeroize crate)

pub mod compression;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;

pub use compression::{CompressionKind, CompressionStage};
pub use crypto::CipherStage;
pub use metrics::{Metrics, MetricsSnapshot};
