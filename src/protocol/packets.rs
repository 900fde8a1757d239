//! Connection-management packets and the standard packet table.
//!
//! These are the packets every connection needs regardless of what the
//! application does in `Play`: the handshake, the status ping, the login and
//! encryption exchange, compression negotiation, keepalives and disconnects.
//! Applications register their own `Play` packets on top through
//! [`register_core_packets`].
//!
//! Ids follow protocol version 47.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

use crate::config::MAX_STRING_LENGTH;
use crate::core::packet::{DescriptorSpec, Direction, Packet};
use crate::core::varint::{BufExt, BufMutExt, MAX_VAR_INT_LEN};
use crate::error::Result;
use crate::protocol::phase::ProtocolPhase;
use crate::protocol::registry::{PacketRegistry, RegistryBuilder};

const MAX_HOST_LENGTH: usize = 255;
const MAX_USERNAME_LENGTH: usize = 16;
const MAX_SERVER_ID_LENGTH: usize = 20;
const MAX_UUID_STRING_LENGTH: usize = 36;
const MAX_KEY_BYTES: usize = 512;
const MAX_TOKEN_BYTES: usize = 256;

/// Worst-case encoded size of a string of `chars` characters
const fn string_bound(chars: usize) -> usize {
    3 + chars * 4
}

/// Which end of the connection the table is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Server,
    Client,
}

impl Side {
    /// Local direction of packets sent by clients.
    pub fn serverbound(self) -> Direction {
        match self {
            Side::Server => Direction::Inbound,
            Side::Client => Direction::Outbound,
        }
    }

    /// Local direction of packets sent by servers.
    pub fn clientbound(self) -> Direction {
        self.serverbound().flip()
    }
}

/// First packet of every connection; selects `Status` or `Login`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_phase: i32,
}

impl Handshake {
    pub fn intended_phase(&self) -> Option<ProtocolPhase> {
        ProtocolPhase::from_intent(self.next_phase)
    }
}

impl Packet for Handshake {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_var_int(self.protocol_version);
        dst.put_string(&self.server_address);
        dst.put_u16(self.server_port);
        dst.put_var_int(self.next_phase);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.protocol_version = src.get_var_int()?;
        self.server_address = src.read_string(MAX_HOST_LENGTH)?;
        self.server_port = src.read_u16()?;
        self.next_phase = src.get_var_int()?;
        Ok(())
    }

    crate::packet_any!();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRequest;

impl Packet for StatusRequest {
    fn encode(&self, _dst: &mut BytesMut) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, _src: &mut Bytes) -> Result<()> {
        Ok(())
    }

    crate::packet_any!();
}

/// Server list response carrying a JSON document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusResponse {
    pub json: String,
}

impl Packet for StatusResponse {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_string(&self.json);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.json = src.read_string(MAX_STRING_LENGTH)?;
        Ok(())
    }

    crate::packet_any!();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusPing {
    pub payload: i64,
}

impl Packet for StatusPing {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i64(self.payload);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.payload = src.read_i64()?;
        Ok(())
    }

    crate::packet_any!();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusPong {
    pub payload: i64,
}

impl Packet for StatusPong {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i64(self.payload);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.payload = src.read_i64()?;
        Ok(())
    }

    crate::packet_any!();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginStart {
    pub username: String,
}

impl Packet for LoginStart {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_string(&self.username);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.username = src.read_string(MAX_USERNAME_LENGTH)?;
        Ok(())
    }

    crate::packet_any!();
}

/// Login refusal with a JSON chat reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginDisconnect {
    pub reason: String,
}

impl Packet for LoginDisconnect {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_string(&self.reason);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.reason = src.read_string(MAX_STRING_LENGTH)?;
        Ok(())
    }

    crate::packet_any!();
}

/// Server public key and verify token. The asymmetric part of the exchange is
/// left to the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub server_id: String,
    pub public_key: Bytes,
    pub verify_token: Bytes,
}

impl Packet for EncryptionRequest {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_string(&self.server_id);
        dst.put_byte_array(&self.public_key);
        dst.put_byte_array(&self.verify_token);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.server_id = src.read_string(MAX_SERVER_ID_LENGTH)?;
        self.public_key = src.read_byte_array(MAX_KEY_BYTES)?;
        self.verify_token = src.read_byte_array(MAX_TOKEN_BYTES)?;
        Ok(())
    }

    crate::packet_any!();
}

/// Encrypted shared secret and verify token from the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionResponse {
    pub shared_secret: Bytes,
    pub verify_token: Bytes,
}

impl Packet for EncryptionResponse {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_byte_array(&self.shared_secret);
        dst.put_byte_array(&self.verify_token);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.shared_secret = src.read_byte_array(MAX_TOKEN_BYTES)?;
        self.verify_token = src.read_byte_array(MAX_TOKEN_BYTES)?;
        Ok(())
    }

    crate::packet_any!();
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginSuccess {
    pub uuid: String,
    pub username: String,
}

impl Packet for LoginSuccess {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_string(&self.uuid);
        dst.put_string(&self.username);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.uuid = src.read_string(MAX_UUID_STRING_LENGTH)?;
        self.username = src.read_string(MAX_USERNAME_LENGTH)?;
        Ok(())
    }

    crate::packet_any!();
}

/// Announces the compression threshold. Frames after this one use the
/// compressed body format; a negative threshold disables compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetCompression {
    pub threshold: i32,
}

impl Packet for SetCompression {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_var_int(self.threshold);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.threshold = src.get_var_int()?;
        Ok(())
    }

    crate::packet_any!();
}

/// Keepalive probe sent by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientboundKeepAlive {
    pub id: i32,
}

impl Packet for ClientboundKeepAlive {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_var_int(self.id);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.id = src.get_var_int()?;
        Ok(())
    }

    crate::packet_any!();
}

/// Keepalive answer echoing the probe id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerboundKeepAlive {
    pub id: i32,
}

impl Packet for ServerboundKeepAlive {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_var_int(self.id);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.id = src.get_var_int()?;
        Ok(())
    }

    crate::packet_any!();
}

/// Disconnect while in `Play`, with a JSON chat reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayDisconnect {
    pub reason: String,
}

impl Packet for PlayDisconnect {
    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_string(&self.reason);
        Ok(())
    }

    fn decode(&mut self, src: &mut Bytes) -> Result<()> {
        self.reason = src.read_string(MAX_STRING_LENGTH)?;
        Ok(())
    }

    crate::packet_any!();
}

/// Register every connection-management packet for `side`.
pub fn register_core_packets(builder: &mut RegistryBuilder, side: Side) -> Result<()> {
    let up = side.serverbound();
    let down = side.clientbound();
    let var_int = (1, MAX_VAR_INT_LEN);

    builder
        .register_with(
            DescriptorSpec::of::<Handshake>(ProtocolPhase::Handshake, up, 0x00)
                .bounds(5, MAX_VAR_INT_LEN + string_bound(MAX_HOST_LENGTH) + 2 + MAX_VAR_INT_LEN),
        )?
        .register_with(DescriptorSpec::of::<StatusRequest>(ProtocolPhase::Status, up, 0x00).exact(0))?
        .register_with(DescriptorSpec::of::<StatusPing>(ProtocolPhase::Status, up, 0x01).exact(8))?
        .register_with(
            DescriptorSpec::of::<StatusResponse>(ProtocolPhase::Status, down, 0x00)
                .bounds(1, string_bound(MAX_STRING_LENGTH))
                .preferred_size(512),
        )?
        .register_with(DescriptorSpec::of::<StatusPong>(ProtocolPhase::Status, down, 0x01).exact(8))?
        .register_with(
            DescriptorSpec::of::<LoginStart>(ProtocolPhase::Login, up, 0x00)
                .bounds(1, string_bound(MAX_USERNAME_LENGTH)),
        )?
        .register_with(
            DescriptorSpec::of::<EncryptionResponse>(ProtocolPhase::Login, up, 0x01)
                .bounds(2, 2 * (2 + MAX_TOKEN_BYTES)),
        )?
        .register_with(
            DescriptorSpec::of::<LoginDisconnect>(ProtocolPhase::Login, down, 0x00)
                .bounds(1, string_bound(MAX_STRING_LENGTH))
                .preferred_size(128),
        )?
        .register_with(
            DescriptorSpec::of::<EncryptionRequest>(ProtocolPhase::Login, down, 0x01).bounds(
                3,
                string_bound(MAX_SERVER_ID_LENGTH) + 2 + MAX_KEY_BYTES + 2 + MAX_TOKEN_BYTES,
            ),
        )?
        .register_with(
            DescriptorSpec::of::<LoginSuccess>(ProtocolPhase::Login, down, 0x02).bounds(
                2,
                string_bound(MAX_UUID_STRING_LENGTH) + string_bound(MAX_USERNAME_LENGTH),
            ),
        )?
        .register_with(
            DescriptorSpec::of::<SetCompression>(ProtocolPhase::Login, down, 0x03).bounds(var_int.0, var_int.1),
        )?
        .register_with(
            DescriptorSpec::of::<ServerboundKeepAlive>(ProtocolPhase::Play, up, 0x00)
                .bounds(var_int.0, var_int.1),
        )?
        .register_with(
            DescriptorSpec::of::<ClientboundKeepAlive>(ProtocolPhase::Play, down, 0x00)
                .bounds(var_int.0, var_int.1),
        )?
        .register_with(
            DescriptorSpec::of::<PlayDisconnect>(ProtocolPhase::Play, down, 0x40)
                .bounds(1, string_bound(MAX_STRING_LENGTH))
                .preferred_size(128),
        )?;
    Ok(())
}

/// Registry holding only the connection-management packets.
pub fn standard_registry(side: Side) -> Result<Arc<PacketRegistry>> {
    let mut builder = RegistryBuilder::new();
    register_core_packets(&mut builder, side)?;
    Ok(builder.build())
}
