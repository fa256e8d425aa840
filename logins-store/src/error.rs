//! Error types for the login store.

use logins_crypto::CryptoError;
use logins_types::InvalidLogin;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for store operations.
pub type LoginsResult<T> = Result<T, LoginsError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum LoginsError {
    /// The login breaks a record invariant.
    #[error("invalid login: {0}")]
    InvalidRecord(#[from] InvalidLogin),

    /// No login with this id exists.
    #[error("no such record: {0}")]
    NoSuchRecord(String),

    /// `add` was given an id that is already taken.
    #[error("id already in use: {0}")]
    IdCollision(String),

    /// `lock` on a locked store, or `unlock` on an unlocked one.
    #[error("store is already in the requested lock state")]
    MismatchedLock,

    /// The key does not match the stored data.
    #[error("invalid encryption key")]
    InvalidKey,

    /// The operation needs the store to be unlocked.
    #[error("store is locked")]
    Locked,

    /// The operation was interrupted.
    #[error("operation interrupted")]
    Interrupted,

    /// A previous panic or invariant violation left the handle unusable.
    #[error("store handle is poisoned")]
    Poisoned,

    /// A stored record could not be decrypted with the current key.
    #[error("record {0} could not be decrypted")]
    DecryptionFailed(String),

    /// Stored data violates an invariant the store relies on.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(rusqlite::Error),

    /// Encryption layer failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for LoginsError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => Self::Interrupted,
            _ => Self::Storage(e),
        }
    }
}

impl LoginsError {
    /// Failures tied to a single record or call. Safe to retry or fix the
    /// input and try again.
    #[must_use]
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            Self::InvalidRecord(_)
                | Self::NoSuchRecord(_)
                | Self::IdCollision(_)
                | Self::DecryptionFailed(_)
                | Self::Interrupted
        )
    }

    /// Failures that require re-establishing lock state or the key before
    /// anything else will succeed.
    #[must_use]
    pub fn is_store_level(&self) -> bool {
        !self.is_record_level()
    }

    /// Whether this error means the handle must not be used again.
    pub(crate) fn poisons_handle(&self) -> bool {
        match self {
            Self::Corrupt(_) | Self::Poisoned => true,
            Self::Storage(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase)
            ),
            _ => false,
        }
    }
}
