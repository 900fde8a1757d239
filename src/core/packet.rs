//! # Packets and Descriptors
//!
//! A [`Packet`] is a typed message that knows how to write and read its own
//! fields. It never writes its id or length; those belong to the codec, which
//! looks them up in the [`PacketDescriptor`] registered for the packet's type.
//!
//! Descriptors are created once while the registry is built and are immutable
//! afterwards. Inbound packets are instantiated through the descriptor's
//! factory and then filled in with [`Packet::decode`].

use bytes::{Bytes, BytesMut};
use std::any::{Any, TypeId};
use std::fmt;

use crate::config::MAX_FRAME_SIZE;
use crate::error::Result;
use crate::protocol::phase::ProtocolPhase;

/// Direction of travel relative to the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by the peer, read by us
    Inbound,
    /// Written by us, read by the peer
    Outbound,
}

impl Direction {
    /// The same packet seen from the other endpoint
    pub fn flip(self) -> Self {
        match self {
            Direction::Inbound => Direction::Outbound,
            Direction::Outbound => Direction::Inbound,
        }
    }
}

/// A structured message exchanged between peers.
pub trait Packet: Any + Send + fmt::Debug {
    /// Write this packet's fields (not its id) into `dst`.
    fn encode(&self, dst: &mut BytesMut) -> Result<()>;

    /// Populate this instance from `src`. Bytes left in `src` afterwards are
    /// treated as a protocol violation by the codec.
    fn decode(&mut self, src: &mut Bytes) -> Result<()>;

    /// Must return `self`; [`packet_any!`](crate::packet_any) writes this.
    fn as_any(&self) -> &dyn Any;

    /// Must return `self`, like [`as_any`](Self::as_any).
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    /// Concrete type name, used in diagnostics
    fn type_name(&self) -> &'static str;
}

impl dyn Packet {
    /// Runtime type of the concrete packet behind this trait object.
    pub fn packet_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    pub fn is<P: Packet>(&self) -> bool {
        self.as_any().is::<P>()
    }

    pub fn downcast_ref<P: Packet>(&self) -> Option<&P> {
        self.as_any().downcast_ref::<P>()
    }

    /// Recover the concrete packet, handing the box back on a type mismatch.
    ///
    /// # Panics
    /// Never. The type is checked while the box is still a `dyn Packet`, and
    /// `into_any` (from [`packet_any!`](crate::packet_any)) returns the same
    /// object, so the `Any` downcast always succeeds. A failed `Any` downcast
    /// could not hand the packet back, which is why the check comes first.
    pub fn downcast<P: Packet>(self: Box<Self>) -> std::result::Result<Box<P>, Box<dyn Packet>> {
        if !self.is::<P>() {
            return Err(self);
        }
        match self.into_any().downcast::<P>() {
            Ok(packet) => Ok(packet),
            Err(_) => unreachable!("packet type was checked before into_any"),
        }
    }
}

/// Implements the `as_any`/`into_any`/`type_name` boilerplate of [`Packet`].
#[macro_export]
macro_rules! packet_any {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn into_any(self: Box<Self>) -> Box<dyn ::std::any::Any + Send> {
            self
        }

        fn type_name(&self) -> &'static str {
            ::std::any::type_name::<Self>()
        }
    };
}

/// Zero-argument constructor producing a fresh, mutable packet
pub type PacketFactory = fn() -> Box<dyn Packet>;

/// Immutable identity and size bounds of one registered packet type.
///
/// Size bounds apply to the field section, i.e. the bytes following the
/// packet id inside a frame.
#[derive(Clone)]
pub struct PacketDescriptor {
    pub(crate) id: i32,
    pub(crate) phase: ProtocolPhase,
    pub(crate) direction: Direction,
    pub(crate) min_size: usize,
    pub(crate) max_size: usize,
    pub(crate) preferred_size: usize,
    pub(crate) name: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) factory: PacketFactory,
}

impl PacketDescriptor {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.phase
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Allocation hint for encoding. Midpoint of the bounds unless overridden.
    pub fn preferred_size(&self) -> usize {
        self.preferred_size
    }

    /// Fully qualified Rust type name of the packet
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn packet_type_id(&self) -> TypeId {
        self.type_id
    }

    /// Whether a field section of `size` bytes is acceptable for this packet
    pub fn accepts_size(&self, size: usize) -> bool {
        (self.min_size..=self.max_size).contains(&size)
    }

    /// Produce a fresh instance ready to be decoded into.
    pub fn create_instance(&self) -> Box<dyn Packet> {
        (self.factory)()
    }
}

impl fmt::Debug for PacketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketDescriptor")
            .field("id", &format_args!("{:#04x}", self.id))
            .field("phase", &self.phase)
            .field("direction", &self.direction)
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("preferred_size", &self.preferred_size)
            .field("name", &self.name)
            .finish()
    }
}

/// Registration input for a single packet type.
///
/// Built with [`DescriptorSpec::of`] and refined with the builder methods
/// before being handed to the registry.
#[derive(Clone)]
pub struct DescriptorSpec {
    pub(crate) id: i32,
    pub(crate) phase: ProtocolPhase,
    pub(crate) direction: Direction,
    pub(crate) min_size: usize,
    pub(crate) max_size: usize,
    pub(crate) preferred_size: Option<usize>,
    pub(crate) name: &'static str,
    pub(crate) type_id: TypeId,
    pub(crate) factory: PacketFactory,
}

impl DescriptorSpec {
    /// Describe `P` with default bounds `[0, MAX_FRAME_SIZE]` and a
    /// `Default`-based factory.
    pub fn of<P: Packet + Default>(phase: ProtocolPhase, direction: Direction, id: i32) -> Self {
        fn make<P: Packet + Default>() -> Box<dyn Packet> {
            Box::new(P::default())
        }
        Self {
            id,
            phase,
            direction,
            min_size: 0,
            max_size: MAX_FRAME_SIZE,
            preferred_size: None,
            name: std::any::type_name::<P>(),
            type_id: TypeId::of::<P>(),
            factory: make::<P>,
        }
    }

    pub fn bounds(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    /// Fixed-size packets have equal bounds.
    pub fn exact(self, size: usize) -> Self {
        self.bounds(size, size)
    }

    pub fn preferred_size(mut self, size: usize) -> Self {
        self.preferred_size = Some(size);
        self
    }

    /// Replace the `Default`-based factory.
    pub fn factory(mut self, factory: PacketFactory) -> Self {
        self.factory = factory;
        self
    }

    pub(crate) fn into_descriptor(self) -> PacketDescriptor {
        let preferred_size = self
            .preferred_size
            .unwrap_or(self.min_size + (self.max_size.saturating_sub(self.min_size)) / 2);
        PacketDescriptor {
            id: self.id,
            phase: self.phase,
            direction: self.direction,
            min_size: self.min_size,
            max_size: self.max_size,
            preferred_size,
            name: self.name,
            type_id: self.type_id,
            factory: self.factory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::varint::{BufExt, BufMutExt};

    #[derive(Debug, Default, PartialEq)]
    struct Probe {
        value: i32,
    }

    impl Packet for Probe {
        fn encode(&self, dst: &mut BytesMut) -> Result<()> {
            dst.put_var_int(self.value);
            Ok(())
        }

        fn decode(&mut self, src: &mut Bytes) -> Result<()> {
            self.value = src.get_var_int()?;
            Ok(())
        }

        packet_any!();
    }

    #[derive(Debug, Default)]
    struct Other;

    impl Packet for Other {
        fn encode(&self, _dst: &mut BytesMut) -> Result<()> {
            Ok(())
        }

        fn decode(&mut self, _src: &mut Bytes) -> Result<()> {
            Ok(())
        }

        packet_any!();
    }

    #[test]
    fn test_preferred_size_defaults_to_midpoint() {
        let descriptor = DescriptorSpec::of::<Probe>(ProtocolPhase::Play, Direction::Inbound, 1)
            .bounds(1, 5)
            .into_descriptor();
        assert_eq!(descriptor.preferred_size(), 3);
        assert!(descriptor.accepts_size(1));
        assert!(descriptor.accepts_size(5));
        assert!(!descriptor.accepts_size(0));
        assert!(!descriptor.accepts_size(6));

        let overridden = DescriptorSpec::of::<Probe>(ProtocolPhase::Play, Direction::Inbound, 1)
            .bounds(1, 5)
            .preferred_size(2)
            .into_descriptor();
        assert_eq!(overridden.preferred_size(), 2);
    }

    #[test]
    fn test_factory_creates_fresh_instances() {
        let descriptor =
            DescriptorSpec::of::<Probe>(ProtocolPhase::Status, Direction::Outbound, 0)
                .into_descriptor();
        let packet = descriptor.create_instance();
        assert!(packet.is::<Probe>());
        assert_eq!(packet.packet_type_id(), TypeId::of::<Probe>());
        assert_eq!(descriptor.packet_type_id(), TypeId::of::<Probe>());
    }

    #[test]
    fn test_downcast_returns_box_on_mismatch() {
        let packet: Box<dyn Packet> = Box::new(Probe { value: 7 });
        let packet = packet.downcast::<Other>().unwrap_err();
        let probe = packet.downcast::<Probe>().unwrap();
        assert_eq!(probe.value, 7);
    }

    #[test]
    fn test_direction_flip() {
        assert_eq!(Direction::Inbound.flip(), Direction::Outbound);
        assert_eq!(Direction::Outbound.flip(), Direction::Inbound);
    }
}
