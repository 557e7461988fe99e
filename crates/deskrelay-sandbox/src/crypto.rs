//! AES-256-GCM decryption of envelope objects.
//!
//! Producers disagree on where the GCM tag lives: some send it separately in
//! `authTag`, others leave it appended to the ciphertext. `Decryptor::open`
//! tries the separate-tag layout first and falls back to the embedded one.
//! This is a compatibility shim only; nothing else keys off which layout won.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use thiserror::Error;

use deskrelay_core::protocol::{KEY_LEN, NONCE_LEN};

/// GCM tag length in bytes.
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid nonce length: expected 12 bytes, got {0}")]
    InvalidNonceLength(usize),

    #[error("Decryption failed: {0}")]
    Failed(String),
}

/// Which tag layout authenticated the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLayout {
    /// `authTag` appended to `cipherText` before opening.
    Appended,
    /// `cipherText` already ends with the tag.
    Embedded,
}

#[derive(Debug)]
pub struct Plaintext {
    pub bytes: Vec<u8>,
    pub layout: TagLayout,
}

/// One cipher per envelope; every object in the envelope shares the key.
pub struct Decryptor {
    cipher: Aes256Gcm,
}

impl Decryptor {
    pub fn new(key: &[u8]) -> Result<Self, DecryptionError> {
        if key.len() != KEY_LEN {
            return Err(DecryptionError::InvalidKeyLength(key.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| DecryptionError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Open `cipher_text` under `iv`. The error of the first layout is
    /// discarded; a failure reports the second layout's error.
    pub fn open(
        &self,
        iv: &[u8],
        cipher_text: &[u8],
        tag: &[u8],
    ) -> Result<Plaintext, DecryptionError> {
        if iv.len() != NONCE_LEN {
            return Err(DecryptionError::InvalidNonceLength(iv.len()));
        }
        let nonce = Nonce::from_slice(iv);

        let mut combined = Vec::with_capacity(cipher_text.len() + tag.len());
        combined.extend_from_slice(cipher_text);
        combined.extend_from_slice(tag);
        if let Ok(bytes) = self.cipher.decrypt(nonce, combined.as_slice()) {
            return Ok(Plaintext {
                bytes,
                layout: TagLayout::Appended,
            });
        }

        self.cipher
            .decrypt(nonce, cipher_text)
            .map(|bytes| Plaintext {
                bytes,
                layout: TagLayout::Embedded,
            })
            .map_err(|e| DecryptionError::Failed(e.to_string()))
    }
}
