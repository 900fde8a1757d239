//! On-task session access.
//!
//! A [`SessionContext`] only exists on the session's driver task, between two
//! frames. Everything done through it (phase switches, pipeline changes,
//! writes) applies immediately, so the next inbound frame is already decoded
//! with the new settings.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Encoder, Framed};
use tracing::{debug, warn};

use crate::core::codec::ConnectionCodec;
use crate::core::packet::Packet;
use crate::core::pipeline::{Stage, COMPRESSION, FRAMER};
use crate::error::{ProtocolError, Result};
use crate::protocol::phase::ProtocolPhase;
use crate::session::handle::{Completion, SessionHandle};
use crate::session::SessionOptions;
use crate::utils::compression::CompressionStage;
use crate::utils::crypto::CipherStage;

/// The driver's transport as seen from a context.
pub(crate) trait Channel: Send {
    fn codec(&self) -> &ConnectionCodec;

    fn codec_mut(&mut self) -> &mut ConnectionCodec;

    /// Encode `packet` into the pending write buffer.
    fn write(&mut self, packet: Box<dyn Packet>) -> Result<()>;
}

impl<T> Channel for Framed<T, ConnectionCodec>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn codec(&self) -> &ConnectionCodec {
        Framed::codec(self)
    }

    fn codec_mut(&mut self) -> &mut ConnectionCodec {
        Framed::codec_mut(self)
    }

    fn write(&mut self, packet: Box<dyn Packet>) -> Result<()> {
        let mut encoded = BytesMut::new();
        self.codec_mut().encode(packet, &mut encoded)?;
        self.write_buffer_mut().extend_from_slice(&encoded);
        Ok(())
    }
}

/// Mutable view of a session, valid for the duration of one callback.
pub struct SessionContext<'a> {
    session: &'a SessionHandle,
    channel: &'a mut dyn Channel,
    options: &'a SessionOptions,
    auto_read: &'a mut bool,
    completions: &'a mut Vec<Completion>,
}

impl<'a> SessionContext<'a> {
    pub(crate) fn new(
        session: &'a SessionHandle,
        channel: &'a mut dyn Channel,
        options: &'a SessionOptions,
        auto_read: &'a mut bool,
        completions: &'a mut Vec<Completion>,
    ) -> Self {
        Self {
            session,
            channel,
            options,
            auto_read,
            completions,
        }
    }

    /// Thread-safe handle to the same session.
    pub fn session(&self) -> &SessionHandle {
        self.session
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.session.remote_addr()
    }

    pub fn ping(&self) -> Duration {
        self.session.ping()
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.channel.codec().phase()
    }

    /// Move to `phase` if the transition is allowed.
    pub fn set_phase(&mut self, phase: ProtocolPhase) -> Result<()> {
        let current = self.channel.codec().phase();
        if !current.can_transition_to(phase) {
            return Err(ProtocolError::ConfigError(format!(
                "cannot move from {current} to {phase}"
            )));
        }
        self.switch_phase(phase);
        Ok(())
    }

    fn switch_phase(&mut self, phase: ProtocolPhase) {
        let codec = self.channel.codec_mut();
        if codec.phase() == phase {
            return;
        }
        codec.set_phase(phase);
        self.session.phase_entered(phase);
    }

    /// Write `packet` now.
    pub fn send<P: Packet>(&mut self, packet: P) -> Result<()> {
        self.write(Box::new(packet), None)
    }

    pub fn send_with<P, F>(&mut self, packet: P, on_complete: F) -> Result<()>
    where
        P: Packet,
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.write(Box::new(packet), Some(Box::new(on_complete)))
    }

    /// Encode one packet into the write buffer, switching to the packet's
    /// phase first if needed. A failed write closes the connection.
    pub(crate) fn write(
        &mut self,
        packet: Box<dyn Packet>,
        on_complete: Option<Completion>,
    ) -> Result<()> {
        if self.session.is_closed() {
            debug!(
                session = self.session.id(),
                packet = packet.type_name(),
                "Dropping send on closed session"
            );
            if let Some(callback) = on_complete {
                callback(Err(ProtocolError::ConnectionClosed));
            }
            return Ok(());
        }

        let target = self
            .session
            .registry()
            .lookup_by_type(packet.as_ref())?
            .phase();
        if target != self.channel.codec().phase() {
            // hold reads until the frame in the new phase is flushed
            *self.auto_read = false;
            self.switch_phase(target);
        }

        match self.channel.write(packet) {
            Ok(()) => {
                if let Some(callback) = on_complete {
                    self.completions.push(callback);
                }
                Ok(())
            }
            Err(error) => {
                warn!(session = self.session.id(), error = %error, "Failed to encode outbound packet");
                if let Some(callback) = on_complete {
                    callback(Err(ProtocolError::ConnectionClosed));
                }
                self.session.close(error.to_string(), false);
                Err(error)
            }
        }
    }

    /// Install the cipher on both directions.
    ///
    /// # Errors
    /// `EncryptionAlreadyEnabled` on a second call, `InvalidKeyLength` for a
    /// key that is not 16 bytes.
    pub fn enable_encryption(&mut self, key: &[u8]) -> Result<()> {
        let pipeline = self.channel.codec_mut().pipeline_mut();
        if pipeline.is_encrypted() {
            return Err(ProtocolError::EncryptionAlreadyEnabled);
        }
        pipeline.add_before(FRAMER, Stage::Cipher(CipherStage::new(key)?))?;
        self.session.metrics().encryption_started();
        debug!(session = self.session.id(), "Encryption enabled");
        Ok(())
    }

    /// Install or retune compression; a negative threshold removes the stage.
    pub fn set_compression_threshold(&mut self, threshold: i32) -> Result<()> {
        let pipeline = self.channel.codec_mut().pipeline_mut();
        if threshold < 0 {
            if pipeline.remove(COMPRESSION)?.is_some() {
                debug!(session = self.session.id(), "Compression disabled");
            }
            return Ok(());
        }

        let threshold = threshold as usize;
        match pipeline.compression_mut() {
            Some(stage) => stage.set_threshold(threshold),
            None => {
                let stage = CompressionStage::new(
                    threshold,
                    self.options.compression_kind,
                    self.options.compression_level,
                )
                .with_max_uncompressed_size(self.options.max_uncompressed_size);
                pipeline.add_after(FRAMER, Stage::Compression(stage))?;
            }
        }
        debug!(session = self.session.id(), threshold, "Compression threshold set");
        Ok(())
    }

    /// Threshold from [`SessionOptions`], or `None` when compression is
    /// disabled for this session.
    pub fn configured_compression_threshold(&self) -> Option<i32> {
        (self.options.compression_threshold >= 0).then_some(self.options.compression_threshold)
    }

    /// Install compression with the configured threshold and return it.
    ///
    /// The peer has to be told first (`SetCompression` in the standard
    /// table), so callers write that packet before calling this.
    pub fn enable_compression(&mut self) -> Result<Option<i32>> {
        let Some(threshold) = self.configured_compression_threshold() else {
            return Ok(None);
        };
        self.set_compression_threshold(threshold)?;
        Ok(Some(threshold))
    }

    pub fn is_encrypted(&self) -> bool {
        self.channel.codec().pipeline().is_encrypted()
    }

    pub fn compression_threshold(&self) -> Option<usize> {
        self.channel
            .codec()
            .pipeline()
            .compression()
            .map(CompressionStage::threshold)
    }

    /// Close the session; see [`SessionHandle::close`].
    pub fn close(&mut self, reason: impl Into<String>) -> bool {
        self.session.close(reason, false)
    }
}
