//! # Encryption Stage
//!
//! AES-128 in CFB-8 mode, a byte-at-a-time stream transform. The shared
//! secret is used both as key and as initialization vector.
//!
//! Each direction owns an independent cipher whose feedback register advances
//! with every byte processed, so every byte of a direction must pass through
//! its cipher exactly once and in order. There is no way to turn encryption off
//! again; the stage lives until the connection closes.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit};
use zeroize::Zeroize;

use crate::error::{ProtocolError, Result};

/// Length of the shared secret in bytes
pub const KEY_LEN: usize = 16;

type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// Byte-level cipher stage holding one cipher per direction.
pub struct CipherStage {
    encryptor: Aes128Cfb8Enc,
    decryptor: Aes128Cfb8Dec,
}

impl CipherStage {
    /// Build both directions from the raw shared secret.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidKeyLength` unless `key` is 16 bytes
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(ProtocolError::InvalidKeyLength(key.len()));
        }
        let mut iv = [0u8; KEY_LEN];
        iv.copy_from_slice(key);

        let encryptor = Aes128Cfb8Enc::new_from_slices(key, &iv)
            .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?;
        let decryptor = Aes128Cfb8Dec::new_from_slices(key, &iv)
            .map_err(|_| ProtocolError::InvalidKeyLength(key.len()))?;
        iv.zeroize();

        Ok(Self {
            encryptor,
            decryptor,
        })
    }

    /// Encrypt outbound bytes in place.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_mut(Aes128Cfb8Enc::block_size()) {
            self.encryptor
                .encrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
    }

    /// Decrypt inbound bytes in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_mut(Aes128Cfb8Dec::block_size()) {
            self.decryptor
                .decrypt_block_mut(GenericArray::from_mut_slice(chunk));
        }
    }
}

impl std::fmt::Debug for CipherStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherStage(aes-128-cfb8)")
    }
}
