//! Per-connection driver task.
//!
//! The driver is the only code that touches a connection's `Framed`
//! transport. It runs on its own tokio task and processes, in priority order:
//! cancellation, handle commands, keepalive ticks, and inbound frames. Reads
//! are paused while a phase-switching write is pending.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, trace, warn};

use crate::core::codec::{ConnectionCodec, LengthFramer};
use crate::core::packet::Packet;
use crate::core::pipeline::Pipeline;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::packets::{ClientboundKeepAlive, ServerboundKeepAlive, Side};
use crate::protocol::phase::ProtocolPhase;
use crate::session::context::SessionContext;
use crate::session::handle::{Command, Completion, SessionHandle};
use crate::session::SessionOptions;
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};

impl SessionHandle {
    /// Bind the session to a connected transport and start its driver.
    ///
    /// Everything queued while preparing is sent first, in order.
    ///
    /// # Errors
    /// Fails if a transport was already attached.
    pub fn attach<T>(&self, io: T, options: SessionOptions) -> Result<JoinHandle<()>>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let commands = self
            .take_receiver()
            .ok_or_else(|| ProtocolError::Custom(constants::ERR_ALREADY_RUNNING.to_string()))?;

        let pipeline = Pipeline::new(LengthFramer::new(options.max_frame_size));
        let codec =
            ConnectionCodec::with_pipeline(self.registry().clone(), pipeline, self.metrics().clone());
        let registry = self.registry();
        let keepalive = registry.descriptor_of::<ClientboundKeepAlive>().is_ok()
            && registry.descriptor_of::<ServerboundKeepAlive>().is_ok();

        let driver = Driver {
            session: self.clone(),
            framed: Framed::new(io, codec),
            commands,
            options,
            auto_read: true,
            completions: Vec::new(),
            keepalive,
        };
        Ok(tokio::spawn(driver.run()))
    }
}

struct Driver<T> {
    session: SessionHandle,
    framed: Framed<T, ConnectionCodec>,
    commands: mpsc::UnboundedReceiver<Command>,
    options: SessionOptions,
    auto_read: bool,
    completions: Vec<Completion>,
    keepalive: bool,
}

impl<T> Driver<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    #[instrument(skip(self), fields(session = self.session.id(), peer = %self.session.remote_addr()))]
    async fn run(mut self) {
        self.session.metrics().connection_established();
        debug!("Session driver started");

        if let Some(queued) = self.session.activate() {
            for command in queued {
                self.execute(command);
            }
            self.flush().await;
        }

        let period = self.options.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.session.cancel_token().clone();

        while !self.session.is_closed() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(command) = self.commands.recv() => self.execute(command),

                _ = keepalive.tick(), if self.keepalive => self.keepalive_tick(),

                frame = self.framed.next(), if self.auto_read => match frame {
                    Some(Ok(packet)) => self.receive(packet),
                    Some(Err(error)) => self.fail(error),
                    None => {
                        self.session.close(constants::REASON_END_OF_STREAM, false);
                    }
                },
            }
            self.flush().await;
        }

        self.teardown().await;
    }

    fn context(&mut self) -> SessionContext<'_> {
        SessionContext::new(
            &self.session,
            &mut self.framed,
            &self.options,
            &mut self.auto_read,
            &mut self.completions,
        )
    }

    fn execute(&mut self, command: Command) {
        trace!(?command, "Executing session command");
        let mut ctx = self.context();
        let result = match command {
            Command::Send {
                packet,
                on_complete,
            } => ctx.write(packet, on_complete),
            Command::SetPhase(phase) => ctx.set_phase(phase),
            Command::SetCompression(threshold) => ctx.set_compression_threshold(threshold),
            Command::EnableEncryption(key) => ctx.enable_encryption(&key),
        };
        if let Err(error) = result {
            warn!(error = %error, "Session command failed");
        }
    }

    fn receive(&mut self, packet: Box<dyn Packet>) {
        if self.session.is_closed() {
            trace!(packet = packet.type_name(), "Dropping packet for closed session");
            return;
        }
        let packet = match self.intercept_keepalive(packet) {
            Some(packet) => packet,
            None => return,
        };

        let listener = self.session.listener().clone();
        let mut ctx = self.context();
        if let Err(error) = listener.on_packet(&mut ctx, packet) {
            warn!(error = %error, "Packet handler failed, closing connection");
            self.session.close(error.to_string(), false);
        }
    }

    /// Keepalives are answered here and never reach the listener.
    fn intercept_keepalive(&mut self, packet: Box<dyn Packet>) -> Option<Box<dyn Packet>> {
        if !self.keepalive {
            return Some(packet);
        }
        match self.options.side {
            Side::Server => match packet.downcast::<ServerboundKeepAlive>() {
                Ok(answer) => {
                    self.session.keepalive_received(Some(answer.id));
                    None
                }
                Err(packet) => Some(packet),
            },
            Side::Client => match packet.downcast::<ClientboundKeepAlive>() {
                Ok(probe) => {
                    self.session.keepalive_received(None);
                    let reply = Box::new(ServerboundKeepAlive { id: probe.id });
                    if let Err(error) = self.context().write(reply, None) {
                        debug!(error = %error, "Failed to answer keepalive");
                    }
                    None
                }
                Err(packet) => Some(packet),
            },
        }
    }

    fn keepalive_tick(&mut self) {
        if self.framed.codec().phase() != ProtocolPhase::Play {
            return;
        }
        if !self.session.check_alive(self.options.keepalive_timeout) {
            return;
        }
        if self.options.side == Side::Server {
            let token = rand::random::<i32>();
            self.session.keepalive_sent(token);
            if let Err(error) = self
                .context()
                .write(Box::new(ClientboundKeepAlive { id: token }), None)
            {
                debug!(error = %error, "Failed to send keepalive");
            }
        }
    }

    fn fail(&mut self, error: ProtocolError) {
        let metrics = self.session.metrics();
        if error.is_peer_violation() {
            metrics.protocol_error();
            warn!(error = %error, "Protocol violation, closing connection");
        } else {
            metrics.connection_error();
            debug!(error = %error, "Connection failed");
        }
        self.session.close(error.to_string(), false);
    }

    /// Push the write buffer to the socket and settle completions.
    async fn flush(&mut self) {
        let completions = std::mem::take(&mut self.completions);
        if self.framed.write_buffer().is_empty() && completions.is_empty() {
            self.auto_read = true;
            return;
        }

        let result = if self.session.is_closed() {
            // last bytes before close, e.g. a disconnect packet
            let limit = self.closing_limit();
            with_timeout_error(limit, SinkExt::<Box<dyn Packet>>::flush(&mut self.framed)).await
        } else {
            // stalled writes are held to the keepalive timeout
            let stall = self.options.keepalive_timeout;
            let cancel = self.session.cancel_token().clone();
            let result = tokio::select! {
                result = with_timeout_error(stall, SinkExt::<Box<dyn Packet>>::flush(&mut self.framed)) => result,
                _ = cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            };
            if let Err(ProtocolError::Timeout) = result {
                warn!(
                    pending = self.framed.write_buffer().len(),
                    "Peer stopped reading, closing connection"
                );
                self.session.metrics().keepalive_timeout();
                self.session.close(constants::REASON_TIMED_OUT, false);
            }
            result
        };

        match result {
            Ok(()) => {
                for callback in completions {
                    callback(Ok(()));
                }
            }
            Err(error) => {
                for callback in completions {
                    callback(Err(ProtocolError::ConnectionClosed));
                }
                if !self.session.is_closed() {
                    self.fail(error);
                }
            }
        }
        self.auto_read = true;
    }

    fn closing_limit(&self) -> Duration {
        DEFAULT_TIMEOUT.min(self.options.keepalive_timeout)
    }

    async fn teardown(mut self) {
        self.session.close(constants::REASON_CONNECTION_CLOSED, false);
        while let Ok(command) = self.commands.try_recv() {
            command.abandon();
        }
        self.flush().await;
        let limit = self.closing_limit();
        if let Err(error) =
            with_timeout_error(limit, SinkExt::<Box<dyn Packet>>::close(&mut self.framed)).await
        {
            trace!(error = %error, "Transport did not shut down cleanly");
        }
        self.session.metrics().connection_closed();
        debug!("Session driver stopped");
    }
}
