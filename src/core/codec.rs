//! # Frame Codec
//!
//! Turns a byte stream into packets and back.
//!
//! ```text
//! frame   := VarInt(body_len) ++ body
//! body    := compression? VarInt(data_len) ++ payload : payload
//! payload := VarInt(packet_id) ++ fields
//! ```
//!
//! The work is split in three layers:
//! - [`LengthFramer`] cuts the stream into length-prefixed frames. It never
//!   blocks: with too few bytes buffered it returns `Ok(None)` and is called
//!   again once more data arrives.
//! - [`PacketCodec`] maps a payload to a packet through the registry, using
//!   the connection's current phase, and enforces the descriptor's size bounds
//!   and the absence of trailing bytes.
//! - [`ConnectionCodec`] glues both to the connection's [`Pipeline`] and
//!   implements `tokio_util::codec::{Decoder, Encoder}` so it can drive a
//!   `Framed` transport.

use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::config::MAX_FRAME_SIZE;
use crate::core::packet::{Direction, Packet, PacketDescriptor};
use crate::core::pipeline::Pipeline;
use crate::core::varint::{read_var_int, var_int_size, BufExt, BufMutExt, MAX_VAR_INT_LEN};
use crate::error::{ProtocolError, Result};
use crate::protocol::phase::ProtocolPhase;
use crate::protocol::registry::PacketRegistry;
use crate::utils::metrics::Metrics;

/// Upper bound on the per-packet allocation hint
const MAX_ALLOCATION_HINT: usize = 64 * 1024;

/// VarInt length-prefix framing.
#[derive(Debug, Clone)]
pub struct LengthFramer {
    max_frame_size: usize,
}

impl Default for LengthFramer {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl LengthFramer {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Split one complete frame body off the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched if the prefix or the body
    /// is still incomplete.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        let (length, prefix) = match read_var_int(src)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        if length < 0 {
            return Err(ProtocolError::NegativeLength(length));
        }
        let length = length as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge(length));
        }

        let total = prefix + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(prefix);
        Ok(Some(src.split_to(length)))
    }

    /// Append `body` to `dst` behind its VarInt length.
    pub fn encode(&self, body: &[u8], dst: &mut BytesMut) -> Result<()> {
        if body.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge(body.len()));
        }
        dst.reserve(var_int_size(body.len() as i32) + body.len());
        dst.put_var_int(body.len() as i32);
        dst.put_slice(body);
        Ok(())
    }
}

/// Payload <-> packet mapping for the connection's current phase.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    registry: Arc<PacketRegistry>,
    phase: ProtocolPhase,
}

impl PacketCodec {
    pub fn new(registry: Arc<PacketRegistry>) -> Self {
        Self {
            registry,
            phase: ProtocolPhase::Handshake,
        }
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: ProtocolPhase) {
        self.phase = phase;
    }

    /// Decode one inbound payload.
    pub fn decode_payload(&self, payload: BytesMut) -> Result<Box<dyn Packet>> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        let mut src = payload.freeze();
        let id = src.get_var_int()?;
        let descriptor = self
            .registry
            .lookup_by_id(self.phase, Direction::Inbound, id)?;

        let size = src.remaining();
        check_bounds(descriptor, size)?;

        let mut packet = descriptor.create_instance();
        packet.decode(&mut src)?;
        if src.has_remaining() {
            return Err(ProtocolError::TrailingBytes {
                packet: descriptor.name(),
                remaining: src.remaining(),
            });
        }
        trace!(packet = descriptor.name(), id, size, "Decoded packet");
        Ok(packet)
    }

    /// Encode one outbound packet into a fresh payload buffer.
    pub fn encode_payload(&self, packet: &dyn Packet) -> Result<BytesMut> {
        let descriptor = self.registry.lookup_by_type(packet)?;
        if descriptor.direction() != Direction::Outbound {
            return Err(ProtocolError::ConfigError(format!(
                "{} is registered as inbound and cannot be sent",
                descriptor.name()
            )));
        }

        let hint = descriptor.preferred_size().min(MAX_ALLOCATION_HINT);
        let mut payload = BytesMut::with_capacity(MAX_VAR_INT_LEN + hint);
        payload.put_var_int(descriptor.id());
        let id_len = payload.len();
        packet.encode(&mut payload)?;
        check_bounds(descriptor, payload.len() - id_len)?;
        Ok(payload)
    }
}

fn check_bounds(descriptor: &PacketDescriptor, size: usize) -> Result<()> {
    if descriptor.accepts_size(size) {
        Ok(())
    } else {
        Err(ProtocolError::FrameSizeOutOfBounds {
            packet: descriptor.name(),
            size,
            min: descriptor.min_size(),
            max: descriptor.max_size(),
        })
    }
}

/// Full connection codec: pipeline stages plus packet mapping.
#[derive(Debug)]
pub struct ConnectionCodec {
    pipeline: Pipeline,
    packets: PacketCodec,
    metrics: Arc<Metrics>,
}

impl ConnectionCodec {
    pub fn new(registry: Arc<PacketRegistry>) -> Self {
        Self::with_pipeline(registry, Pipeline::default(), Arc::new(Metrics::new()))
    }

    pub fn with_pipeline(
        registry: Arc<PacketRegistry>,
        pipeline: Pipeline,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pipeline,
            packets: PacketCodec::new(registry),
            metrics,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.packets.phase()
    }

    pub fn set_phase(&mut self, phase: ProtocolPhase) {
        if self.packets.phase() != phase {
            debug!(from = %self.packets.phase(), to = %phase, "Switching codec phase");
        }
        self.packets.set_phase(phase);
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        self.packets.registry()
    }
}

impl Decoder for ConnectionCodec {
    type Item = Box<dyn Packet>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let payload = match self.pipeline.decode(src)? {
            Some(payload) => payload,
            None => return Ok(None),
        };
        let size = payload.len() as u64;
        let packet = self.packets.decode_payload(payload)?;
        self.metrics.packet_received(size);
        Ok(Some(packet))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None => {
                if self.pipeline.has_pending() {
                    debug!(
                        pending = self.pipeline.pending_len(),
                        "Stream ended inside a frame"
                    );
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Box<dyn Packet>> for ConnectionCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Box<dyn Packet>, dst: &mut BytesMut) -> Result<()> {
        let payload = self.packets.encode_payload(packet.as_ref())?;
        let before = dst.len();
        let compressed = self.pipeline.encode(payload, dst)?;
        if compressed {
            self.metrics.frame_compressed();
        }
        self.metrics.packet_sent((dst.len() - before) as u64);
        Ok(())
    }
}
