//! # Protocol Layer
//!
//! Protocol phases, the packet registry, the standard connection packets and
//! the type-routed dispatcher.
//!
//! ## Phases
//! ```text
//! Handshake -> Status
//!           -> Login -> Play
//! ```
//!
//! Each phase owns one id table per direction. The registry is built once at
//! startup; duplicate ids are rejected there and nowhere else.

pub mod dispatcher;
pub mod packets;
pub mod phase;
pub mod registry;
