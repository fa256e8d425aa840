//! Encryption seam used by the store.
//!
//! The store holds an `Arc<dyn EncryptorDecryptor>` while unlocked and never
//! sees raw key bytes. Dropping the encryptor on `lock()` drops (and zeroizes)
//! the key.

use crate::cipher;
use crate::error::CryptoResult;
use crate::key::EncryptionKey;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Context label for login secure fields.
const SECURE_FIELDS_CONTEXT: &[u8] = b"logins/secure-fields/v1";

/// Encrypts and decrypts opaque blobs stored in the database.
pub trait EncryptorDecryptor: Send + Sync {
    /// Encrypts `cleartext`, returning the stored string form.
    fn encrypt(&self, cleartext: &[u8]) -> CryptoResult<String>;

    /// Decrypts a string produced by [`EncryptorDecryptor::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> CryptoResult<Vec<u8>>;
}

/// JSON helpers on top of any [`EncryptorDecryptor`].
pub trait EncryptorDecryptorExt: EncryptorDecryptor {
    fn encrypt_struct<T: Serialize>(&self, value: &T) -> CryptoResult<String> {
        let json = zeroize::Zeroizing::new(serde_json::to_vec(value)?);
        self.encrypt(&json)
    }

    fn decrypt_struct<T: DeserializeOwned>(&self, ciphertext: &str) -> CryptoResult<T> {
        let json = zeroize::Zeroizing::new(self.decrypt(ciphertext)?);
        Ok(serde_json::from_slice(&json)?)
    }
}

impl<E: EncryptorDecryptor + ?Sized> EncryptorDecryptorExt for E {}

/// The production encryptor: ChaCha20-Poly1305 under a single store key.
#[derive(Debug)]
pub struct KeyEncryptor {
    key: EncryptionKey,
}

impl KeyEncryptor {
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Builds an encryptor from the host's exported key string.
    pub fn from_key_str(key: &str) -> CryptoResult<Self> {
        Ok(Self::new(EncryptionKey::parse(key)?))
    }

    #[must_use]
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }
}

impl EncryptorDecryptor for KeyEncryptor {
    fn encrypt(&self, cleartext: &[u8]) -> CryptoResult<String> {
        cipher::seal_to_string(&self.key, SECURE_FIELDS_CONTEXT, cleartext)
    }

    fn decrypt(&self, ciphertext: &str) -> CryptoResult<Vec<u8>> {
        cipher::open_from_str(&self.key, SECURE_FIELDS_CONTEXT, ciphertext)
    }
}
