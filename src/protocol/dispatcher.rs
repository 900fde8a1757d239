use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use tracing::debug;

use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::phase::ProtocolPhase;
use crate::session::{PacketListener, SessionContext, SessionHandle};

type HandlerFn = dyn Fn(&mut SessionContext<'_>, Box<dyn Packet>) -> Result<()> + Send + Sync + 'static;
type ClosedFn = dyn Fn(&SessionHandle, &str) + Send + Sync + 'static;
type PhaseFn = dyn Fn(&SessionHandle, ProtocolPhase) + Send + Sync + 'static;

/// Packet listener routing each inbound packet to the handler registered for
/// its concrete type.
///
/// Packets without a handler are dropped with a debug log. A handler error
/// closes the connection.
pub struct Dispatcher {
    handlers: RwLock<HashMap<TypeId, Box<HandlerFn>>>,
    closed: RwLock<Option<Box<ClosedFn>>>,
    phase: RwLock<Option<Box<PhaseFn>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            closed: RwLock::new(None),
            phase: RwLock::new(None),
        }
    }

    /// Route packets of type `P` to `handler`, replacing any earlier handler.
    pub fn register<P, F>(&self, handler: F)
    where
        P: Packet,
        F: Fn(&mut SessionContext<'_>, P) -> Result<()> + Send + Sync + 'static,
    {
        let erased = move |ctx: &mut SessionContext<'_>, packet: Box<dyn Packet>| match packet
            .downcast::<P>()
        {
            Ok(packet) => handler(ctx, *packet),
            Err(packet) => {
                debug!(packet = packet.type_name(), "Handler type mismatch");
                Ok(())
            }
        };
        self.handlers
            .write()
            .insert(TypeId::of::<P>(), Box::new(erased));
    }

    pub fn on_closed<F>(&self, hook: F)
    where
        F: Fn(&SessionHandle, &str) + Send + Sync + 'static,
    {
        *self.closed.write() = Some(Box::new(hook));
    }

    pub fn on_phase_entered<F>(&self, hook: F)
    where
        F: Fn(&SessionHandle, ProtocolPhase) + Send + Sync + 'static,
    {
        *self.phase.write() = Some(Box::new(hook));
    }

    pub fn handles<P: Packet>(&self) -> bool {
        self.handlers.read().contains_key(&TypeId::of::<P>())
    }

    pub fn dispatch(&self, ctx: &mut SessionContext<'_>, packet: Box<dyn Packet>) -> Result<()> {
        let handlers = self.handlers.read();
        match handlers.get(&packet.packet_type_id()) {
            Some(handler) => handler(ctx, packet),
            None => {
                debug!(packet = packet.type_name(), "No handler registered");
                Ok(())
            }
        }
    }
}

impl PacketListener for Dispatcher {
    fn on_packet(&self, ctx: &mut SessionContext<'_>, packet: Box<dyn Packet>) -> Result<()> {
        self.dispatch(ctx, packet)
    }

    fn on_phase_entered(&self, session: &SessionHandle, phase: ProtocolPhase) {
        if let Some(hook) = self.phase.read().as_ref() {
            hook(session, phase);
        }
    }

    fn on_closed(&self, session: &SessionHandle, reason: &str) {
        if let Some(hook) = self.closed.read().as_ref() {
            hook(session, reason);
        }
    }
}
