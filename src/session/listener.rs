//! Collaborator callbacks.

use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::phase::ProtocolPhase;
use crate::session::context::SessionContext;
use crate::session::handle::SessionHandle;

/// Receives everything a session surfaces to the application.
///
/// `on_packet` runs on the session's own task with an on-task
/// [`SessionContext`]; changes made through it apply before the next frame is
/// decoded. Returning an error closes the connection with the error text as
/// the reason.
///
/// `on_closed` runs exactly once per session, on whichever thread performed
/// the close, and not at all if the application closed the session with
/// `graceful = true`.
pub trait PacketListener: Send + Sync + 'static {
    fn on_packet(&self, ctx: &mut SessionContext<'_>, packet: Box<dyn Packet>) -> Result<()>;

    fn on_phase_entered(&self, _session: &SessionHandle, _phase: ProtocolPhase) {}

    fn on_closed(&self, _session: &SessionHandle, _reason: &str) {}
}
