//! ChaCha20-Poly1305 sealing with a context label.
//!
//! Every ciphertext is bound to a short context string passed as associated
//! data, so a value sealed for one purpose (say, the key canary) cannot be
//! replayed where another is expected (a login's secure fields).
//!
//! Stored form: base64(`nonce || ciphertext || tag`).

use crate::error::{CryptoError, CryptoResult};
use crate::key::EncryptionKey;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// A sealed value: nonce plus ciphertext (auth tag included).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedBox {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl SealedBox {
    /// Encodes to the stored base64 form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        STANDARD.encode(&bytes)
    }

    /// Decodes the stored base64 form.
    pub fn decode(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Malformed(format!("invalid base64: {e}")))?;
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Malformed(format!(
                "{} bytes is too short",
                bytes.len()
            )));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);
        Ok(Self {
            nonce: nonce_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Encrypts `plaintext` under `key`, bound to `context`.
pub fn seal(key: &EncryptionKey, context: &[u8], plaintext: &[u8]) -> CryptoResult<SealedBox> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext,
                aad: context,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(SealedBox {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts a box produced by [`seal`] with the same key and context.
pub fn open(key: &EncryptionKey, context: &[u8], sealed: &SealedBox) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad: context,
            },
        )
        .map_err(|_| {
            CryptoError::Decryption("wrong key, wrong context or tampered data".to_string())
        })
}

/// Seals and encodes in one step.
pub fn seal_to_string(key: &EncryptionKey, context: &[u8], plaintext: &[u8]) -> CryptoResult<String> {
    Ok(seal(key, context, plaintext)?.encode())
}

/// Decodes and opens in one step.
pub fn open_from_str(key: &EncryptionKey, context: &[u8], encoded: &str) -> CryptoResult<Vec<u8>> {
    open(key, context, &SealedBox::decode(encoded)?)
}
