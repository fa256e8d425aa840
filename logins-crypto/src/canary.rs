//! Key canaries.
//!
//! A canary is a fixed plaintext sealed under the store key and kept next to
//! the encrypted data. Opening it tells us whether a candidate key is the
//! one the data was written with, without touching any login.

use crate::cipher::{self, SealedBox};
use crate::error::{CryptoError, CryptoResult};
use crate::key::EncryptionKey;

const CANARY_CONTEXT: &[u8] = b"logins/canary/v1";

/// The plaintext every canary carries.
pub const CANARY_TEXT: &str = "logins store key check";

/// Outcome of checking a key against a stored canary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryCheck {
    /// The key opens the canary.
    Match,
    /// The key does not open the canary.
    WrongKey,
    /// The canary opened but held unexpected content.
    UnexpectedContent,
}

/// Seals a new canary under `key`.
pub fn create_canary(key: &EncryptionKey) -> CryptoResult<String> {
    cipher::seal_to_string(key, CANARY_CONTEXT, CANARY_TEXT.as_bytes())
}

/// Checks `key` against a stored canary.
///
/// Fails only when the stored canary itself is malformed.
pub fn check_canary(canary: &str, key: &EncryptionKey) -> CryptoResult<CanaryCheck> {
    let sealed = SealedBox::decode(canary)?;
    match cipher::open(key, CANARY_CONTEXT, &sealed) {
        Ok(text) if text == CANARY_TEXT.as_bytes() => Ok(CanaryCheck::Match),
        Ok(_) => Ok(CanaryCheck::UnexpectedContent),
        Err(CryptoError::Decryption(_)) => Ok(CanaryCheck::WrongKey),
        Err(e) => Err(e),
    }
}
