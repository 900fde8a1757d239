//! # Transport Layer
//!
//! Binds sessions to sockets.
//!
//! ## Transports
//! - **TCP**: accept loop with connection limit and graceful shutdown, plus a
//!   client connector
//!
//! Any `AsyncRead + AsyncWrite` stream can also be attached to a session
//! directly with [`SessionHandle::attach`](crate::session::SessionHandle::attach).

pub mod tcp;
