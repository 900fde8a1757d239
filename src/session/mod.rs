//! # Connection Sessions
//!
//! One [`SessionHandle`] per physical connection. Each session owns:
//! - a lifecycle (`Preparing -> Active -> Closed`), orthogonal to the protocol
//!   phase
//! - an outbound queue used while the transport is not yet running
//! - keepalive bookkeeping and the last measured ping
//! - the disconnect reason, kept after close for late observers
//!
//! All pipeline and phase mutation happens on the session's driver task.
//! Listener callbacks get a [`SessionContext`] that mutates directly; every
//! other caller goes through the handle, which hands the request to the driver
//! and returns immediately.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use protocol_session::protocol::packets::{standard_registry, Side};
//! use protocol_session::protocol::dispatcher::Dispatcher;
//! use protocol_session::session::{SessionHandle, SessionOptions};
//! use protocol_session::utils::metrics::Metrics;
//!
//! # async fn run(stream: tokio::net::TcpStream) -> protocol_session::error::Result<()> {
//! let registry = standard_registry(Side::Server)?;
//! let session = SessionHandle::new(
//!     stream.peer_addr()?,
//!     registry,
//!     Arc::new(Dispatcher::new()),
//!     Arc::new(Metrics::new()),
//! );
//! let driver = session.attach(stream, SessionOptions::default())?;
//! session.closed().await;
//! let _ = driver.await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod driver;
pub mod handle;
pub mod listener;

use std::time::Duration;

use crate::config::{
    NetworkConfig, DEFAULT_COMPRESSION_THRESHOLD, MAX_FRAME_SIZE, MAX_UNCOMPRESSED_SIZE,
};
use crate::protocol::packets::Side;
use crate::utils::compression::CompressionKind;
use crate::utils::timeout::{KEEPALIVE_INTERVAL, KEEPALIVE_TIMEOUT};

pub use context::SessionContext;
pub use handle::{Completion, Lifecycle, SessionHandle};
pub use listener::PacketListener;

/// Per-session settings fixed when the transport is attached.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Which end of the connection this session is
    pub side: Side,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub max_frame_size: usize,
    /// Threshold used by `SessionContext::enable_compression`; negative disables
    pub compression_threshold: i32,
    pub compression_kind: CompressionKind,
    pub compression_level: i32,
    pub max_uncompressed_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            side: Side::Server,
            keepalive_interval: KEEPALIVE_INTERVAL,
            keepalive_timeout: KEEPALIVE_TIMEOUT,
            max_frame_size: MAX_FRAME_SIZE,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_kind: CompressionKind::Zlib,
            compression_level: 6,
            max_uncompressed_size: MAX_UNCOMPRESSED_SIZE,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &NetworkConfig, side: Side) -> Self {
        Self {
            side,
            keepalive_interval: config.server.keepalive_interval,
            keepalive_timeout: config.server.keepalive_timeout,
            max_frame_size: config.transport.max_frame_size,
            compression_threshold: config.transport.compression_threshold,
            compression_kind: config.transport.compression_kind,
            compression_level: config.transport.compression_level,
            max_uncompressed_size: config.transport.max_uncompressed_size,
        }
    }

    pub fn client() -> Self {
        Self {
            side: Side::Client,
            ..Self::default()
        }
    }
}
