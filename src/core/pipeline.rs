//! # Connection Pipeline
//!
//! Ordered, named list of transformation stages between the socket and the
//! packet codec. Every connection starts with only the framer:
//!
//! ```text
//! socket <-> [cipher] <-> framer <-> [compression] <-> packet codec
//! ```
//!
//! Byte stages (the cipher) see the raw stream and must sit before the
//! framer. Frame stages (compression) see whole frame bodies and must sit
//! after it. Stages are installed relative to an existing stage by name, the
//! same way a protocol upgrade splices a handler into a running channel.
//!
//! Inbound bytes are moved out of the read buffer as they arrive, passed
//! through the byte stages once, and parked in a staging buffer until a full
//! frame is available. Installing a cipher mid-stream decrypts the parked bytes
//! so data that arrived together with the key-exchange frame is not lost.

use bytes::BytesMut;
use tracing::debug;

use crate::core::codec::LengthFramer;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::compression::CompressionStage;
use crate::utils::crypto::CipherStage;

/// Stage name of the AES/CFB8 cipher
pub const CIPHER: &str = "cipher";
/// Stage name of the VarInt length framer
pub const FRAMER: &str = "framer";
/// Stage name of the threshold compressor
pub const COMPRESSION: &str = "compression";

/// A single pipeline stage.
#[derive(Debug)]
pub enum Stage {
    Cipher(CipherStage),
    Framer(LengthFramer),
    Compression(CompressionStage),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Cipher(_) => CIPHER,
            Stage::Framer(_) => FRAMER,
            Stage::Compression(_) => COMPRESSION,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Stage::Cipher(_) => 0,
            Stage::Framer(_) => 1,
            Stage::Compression(_) => 2,
        }
    }
}

/// Per-connection stage list plus inbound staging buffer.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
    staged: BytesMut,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(LengthFramer::default())
    }
}

impl Pipeline {
    pub fn new(framer: LengthFramer) -> Self {
        Self {
            stages: vec![Stage::Framer(framer)],
            staged: BytesMut::new(),
        }
    }

    /// Stage names from the socket side inward.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name() == name)
    }

    /// Install `stage` immediately before (socket side of) `anchor`.
    pub fn add_before(&mut self, anchor: &str, stage: Stage) -> Result<()> {
        let index = self
            .position(anchor)
            .ok_or_else(|| ProtocolError::StageNotFound(anchor.to_string()))?;
        self.insert(index, stage)
    }

    /// Install `stage` immediately after (packet side of) `anchor`.
    pub fn add_after(&mut self, anchor: &str, stage: Stage) -> Result<()> {
        let index = self
            .position(anchor)
            .ok_or_else(|| ProtocolError::StageNotFound(anchor.to_string()))?;
        self.insert(index + 1, stage)
    }

    fn insert(&mut self, index: usize, mut stage: Stage) -> Result<()> {
        if self.contains(stage.name()) {
            return Err(ProtocolError::ConfigError(format!(
                "pipeline stage {} is already installed",
                stage.name()
            )));
        }
        let before_ok = index == 0 || self.stages[index - 1].rank() < stage.rank();
        let after_ok = index == self.stages.len() || self.stages[index].rank() > stage.rank();
        if !(before_ok && after_ok) {
            return Err(ProtocolError::StageOrder(match stage {
                Stage::Cipher(_) => constants::ERR_CIPHER_AFTER_FRAMER,
                _ => constants::ERR_COMPRESSION_BEFORE_FRAMER,
            }));
        }

        if let Stage::Cipher(cipher) = &mut stage {
            if !self.staged.is_empty() {
                debug!(bytes = self.staged.len(), "Decrypting bytes buffered ahead of the cipher");
                cipher.decrypt(&mut self.staged);
            }
        }

        debug!(stage = stage.name(), index, "Installed pipeline stage");
        self.stages.insert(index, stage);
        Ok(())
    }

    /// Remove a stage by name. Returns `None` if it was not installed.
    ///
    /// # Errors
    /// The framer and the cipher stay for the life of the connection;
    /// removing either fails with `ProtocolError::StagePinned`.
    pub fn remove(&mut self, name: &str) -> Result<Option<Stage>> {
        let Some(index) = self.position(name) else {
            return Ok(None);
        };
        match &self.stages[index] {
            Stage::Framer(_) => return Err(ProtocolError::StagePinned(FRAMER)),
            Stage::Cipher(_) => return Err(ProtocolError::StagePinned(CIPHER)),
            Stage::Compression(_) => {}
        }
        debug!(stage = name, "Removed pipeline stage");
        Ok(Some(self.stages.remove(index)))
    }

    pub fn compression(&self) -> Option<&CompressionStage> {
        self.stages.iter().find_map(|s| match s {
            Stage::Compression(c) => Some(c),
            _ => None,
        })
    }

    pub fn compression_mut(&mut self) -> Option<&mut CompressionStage> {
        self.stages.iter_mut().find_map(|s| match s {
            Stage::Compression(c) => Some(c),
            _ => None,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.contains(CIPHER)
    }

    /// Whether bytes of an incomplete frame are waiting in the staging buffer.
    pub fn has_pending(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.staged.len()
    }

    /// Pull everything out of `src`, run it through the byte stages and try to
    /// produce the next frame payload.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if !src.is_empty() {
            let mut incoming = src.split();
            for stage in self.stages.iter_mut() {
                match stage {
                    Stage::Cipher(cipher) => cipher.decrypt(&mut incoming),
                    _ => break,
                }
            }
            self.staged.unsplit(incoming);
        }

        let mut frame = None;
        for stage in self.stages.iter() {
            frame = match (stage, frame) {
                (Stage::Cipher(_), None) => None,
                (Stage::Framer(framer), None) => match framer.decode(&mut self.staged)? {
                    Some(body) => Some(body),
                    None => return Ok(None),
                },
                (Stage::Compression(compression), Some(body)) => Some(compression.decode(body)?),
                (_, other) => other,
            };
        }
        Ok(frame)
    }

    /// Run `payload` outward through every stage, appending the wire bytes to
    /// `dst`. Returns whether the frame was compressed.
    pub fn encode(&mut self, payload: BytesMut, dst: &mut BytesMut) -> Result<bool> {
        let mut body = payload;
        let mut compressed = false;
        let mut wire: Option<BytesMut> = None;

        for stage in self.stages.iter_mut().rev() {
            match stage {
                Stage::Compression(compression) => {
                    let (wrapped, was_compressed) = compression.encode(body.split())?;
                    body = wrapped;
                    compressed = was_compressed;
                }
                Stage::Framer(framer) => {
                    let mut framed = BytesMut::with_capacity(body.len() + 3);
                    framer.encode(&body, &mut framed)?;
                    wire = Some(framed);
                }
                Stage::Cipher(cipher) => {
                    if let Some(bytes) = wire.as_mut() {
                        cipher.encrypt(bytes);
                    }
                }
            }
        }

        let bytes = wire.ok_or_else(|| ProtocolError::StageNotFound(FRAMER.to_string()))?;
        dst.extend_from_slice(&bytes);
        Ok(compressed)
    }
}
