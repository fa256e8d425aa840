//! Error types for the sync layer.

use crate::telemetry::FailureReason;
use crate::transport::PRECONDITION_FAILED;
use logins_store::LoginsError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The token server or storage server rejected our credentials. The
    /// host has to re-authenticate before syncing again.
    #[error("sync credentials rejected: {0}")]
    AuthInvalid(String),

    /// Transport failure after the transport's own retries.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error status.
    #[error("server returned HTTP {status}")]
    Http { status: u16 },

    /// The pass was interrupted, e.g. because the host is shutting down.
    #[error("sync interrupted")]
    Interrupted,

    /// Local storage failed.
    #[error("store error: {0}")]
    Store(LoginsError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else, e.g. a blocking task that panicked.
    #[error("unexpected sync error: {0}")]
    Unexpected(String),
}

impl From<LoginsError> for SyncError {
    fn from(e: LoginsError) -> Self {
        match e {
            LoginsError::Interrupted => Self::Interrupted,
            other => Self::Store(other),
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Unexpected(format!("blocking task failed: {e}"))
    }
}

impl SyncError {
    /// Whether an upload was refused because the collection changed after
    /// our fetch.
    #[must_use]
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::Http { status } if *status == PRECONDITION_FAILED)
    }

    /// How this error is reported in the telemetry ping.
    #[must_use]
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::AuthInvalid(_) => FailureReason::Auth,
            Self::Http { status } => FailureReason::Http { code: *status },
            Self::Interrupted => FailureReason::Shutdown,
            Self::Network(msg) => FailureReason::Other {
                message: msg.clone(),
            },
            Self::Store(_) | Self::Serialization(_) | Self::Unexpected(_) => {
                FailureReason::Unexpected {
                    message: self.to_string(),
                }
            }
        }
    }
}
