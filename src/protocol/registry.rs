//! # Packet Type Registry
//!
//! Maps packet types to their [`PacketDescriptor`] and `(phase, direction, id)`
//! triples back to descriptors.
//!
//! The registry is populated once through a [`RegistryBuilder`] before any
//! connection is accepted. Duplicate ids or duplicate types are rejected at
//! that point. [`RegistryBuilder::build`] freezes the tables into an
//! `Arc<PacketRegistry>` which is shared read-only by every session.
//!
//! ## Error semantics
//! - [`PacketRegistry::lookup_by_type`] failing means the application tried to
//!   send a packet it never registered: a configuration error.
//! - [`PacketRegistry::lookup_by_id`] failing means the peer sent an id that is
//!   not valid in the current phase: a peer violation that closes only that
//!   connection.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::packet::{DescriptorSpec, Direction, Packet, PacketDescriptor};
use crate::error::{ProtocolError, Result};
use crate::protocol::phase::{PhaseTable, ProtocolPhase};

/// Write-once, read-only table of every known packet type.
#[derive(Debug, Default)]
pub struct PacketRegistry {
    phases: [PhaseTable; 4],
    by_type: HashMap<TypeId, Arc<PacketDescriptor>>,
}

impl PacketRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Descriptor registered for the runtime type of `packet`.
    pub fn lookup_by_type(&self, packet: &dyn Packet) -> Result<&Arc<PacketDescriptor>> {
        self.by_type
            .get(&packet.packet_type_id())
            .ok_or_else(|| ProtocolError::UnknownPacketType(packet.type_name()))
    }

    /// Descriptor registered for the static type `P`.
    pub fn descriptor_of<P: Packet>(&self) -> Result<&Arc<PacketDescriptor>> {
        self.by_type
            .get(&TypeId::of::<P>())
            .ok_or_else(|| ProtocolError::UnknownPacketType(std::any::type_name::<P>()))
    }

    pub fn lookup_by_id(
        &self,
        phase: ProtocolPhase,
        direction: Direction,
        id: i32,
    ) -> Result<&Arc<PacketDescriptor>> {
        self.phases[phase.index()]
            .get(direction, id)
            .ok_or(ProtocolError::UnknownPacketId {
                phase,
                direction,
                id,
            })
    }

    pub fn create_instance(&self, descriptor: &PacketDescriptor) -> Box<dyn Packet> {
        descriptor.create_instance()
    }

    pub fn phase_table(&self, phase: ProtocolPhase) -> &PhaseTable {
        &self.phases[phase.index()]
    }

    /// Total number of registered packet types
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

/// Mutable population phase of a [`PacketRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: PacketRegistry,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `P` under `id` with default bounds.
    pub fn register<P: Packet + Default>(
        &mut self,
        phase: ProtocolPhase,
        direction: Direction,
        id: i32,
    ) -> Result<&mut Self> {
        self.register_with(DescriptorSpec::of::<P>(phase, direction, id))
    }

    /// Register a fully specified descriptor.
    pub fn register_with(&mut self, spec: DescriptorSpec) -> Result<&mut Self> {
        if spec.min_size > spec.max_size {
            return Err(ProtocolError::ConfigError(format!(
                "{}: minimum size {} exceeds maximum size {}",
                spec.name, spec.min_size, spec.max_size
            )));
        }
        if self.registry.by_type.contains_key(&spec.type_id) {
            return Err(ProtocolError::DuplicateType(spec.name));
        }

        let descriptor = Arc::new(spec.into_descriptor());
        self.registry.phases[descriptor.phase().index()].insert(descriptor.clone())?;
        debug!(
            packet = descriptor.name(),
            id = descriptor.id(),
            phase = %descriptor.phase(),
            direction = ?descriptor.direction(),
            "Registered packet"
        );
        self.registry
            .by_type
            .insert(descriptor.packet_type_id(), descriptor);
        Ok(self)
    }

    /// Freeze the tables. The returned registry is immutable.
    pub fn build(self) -> Arc<PacketRegistry> {
        debug!(packets = self.registry.len(), "Packet registry built");
        Arc::new(self.registry)
    }
}
