//! # protocol-session
//!
//! Wire-protocol and connection core for binary, phase-based client/server
//! protocols.
//!
//! ## Layers
//! - [`core`]: VarInt codecs, the `Packet` trait, length framing, and the
//!   per-connection stage pipeline
//! - [`protocol`]: protocol phases, the packet registry, standard connection
//!   packets, and a type-routed dispatcher
//! - [`session`]: per-connection state machine, outbound queue, keepalive and
//!   close handling
//! - [`transport`]: TCP accept loop and connector
//! - [`utils`]: compression and encryption stages, logging, metrics, timeouts
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use protocol_session::config::NetworkConfig;
//! use protocol_session::protocol::dispatcher::Dispatcher;
//! use protocol_session::protocol::packets::{standard_registry, Handshake, Side};
//! use protocol_session::session::PacketListener;
//! use protocol_session::transport::tcp;
//!
//! #[tokio::main]
//! async fn main() -> protocol_session::error::Result<()> {
//!     let config = NetworkConfig::from_env()?;
//!     protocol_session::utils::logging::init_logging(&config.logging)?;
//!     let registry = standard_registry(Side::Server)?;
//!
//!     tcp::start_server(config, registry, |_peer| {
//!         let dispatcher = Dispatcher::new();
//!         dispatcher.register(|ctx, handshake: Handshake| match handshake.intended_phase() {
//!             Some(phase) => ctx.set_phase(phase),
//!             None => {
//!                 ctx.close("Invalid handshake intent");
//!                 Ok(())
//!             }
//!         });
//!         Arc::new(dispatcher) as Arc<dyn PacketListener>
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod utils;

pub use crate::core::packet::{Direction, Packet};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::phase::ProtocolPhase;
pub use crate::protocol::registry::{PacketRegistry, RegistryBuilder};
pub use crate::session::{PacketListener, SessionContext, SessionHandle, SessionOptions};
