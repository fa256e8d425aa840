//! Encryption layer for the logins store.
//!
//! Provides:
//! - [`EncryptionKey`]: 256-bit store key with base64url export and zeroize-on-drop
//! - [`cipher`]: ChaCha20-Poly1305 sealing bound to a context label
//! - [`EncryptorDecryptor`]: the seam the store encrypts secure fields through
//! - [`canary`]: key check values stored next to the data
//!
//! # Security Model
//!
//! - Only the username and password of a login are encrypted; origins and
//!   form hints stay queryable in the clear.
//! - Every ciphertext carries its own random 96-bit nonce.
//! - Key material never leaves this crate except as the exported key string
//!   the host is responsible for keeping.

pub mod canary;
pub mod cipher;
mod encryptor;
mod error;
mod key;

pub use canary::{CANARY_TEXT, CanaryCheck, check_canary, create_canary};
pub use cipher::{NONCE_SIZE, SealedBox, TAG_SIZE, open, seal};
pub use encryptor::{EncryptorDecryptor, EncryptorDecryptorExt, KeyEncryptor};
pub use error::{CryptoError, CryptoResult};
pub use key::{EncryptionKey, KEY_SIZE};
