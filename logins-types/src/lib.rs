//! Core type definitions for the logins engine.
//!
//! This crate defines the types shared by the store and the sync engine:
//! - Record identifiers ([`Guid`])
//! - Login records split into plain fields, secure fields and metadata
//! - Validation and normalization of caller supplied entries
//! - Millisecond timestamps used by the store and the sync server
//! - Typed events that the store publishes for the host application
//!
//! Nothing here touches storage, encryption or the network.

mod event;
mod guid;
mod login;
mod origin;
mod timestamp;
mod validate;

pub use event::{
    DEFAULT_OUTBOX_CAPACITY, Event, EventId, EventOutbox, KeyRegenerationReason, StoreEvent,
};
pub use guid::Guid;
pub use login::{Login, LoginEntry, LoginFields, RecordFields, SecureLoginFields};
pub use origin::{Host, origin_host};
pub use timestamp::{ServerTimestamp, now_millis};
pub use validate::InvalidLogin;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid login: {0}")]
    InvalidLogin(#[from] InvalidLogin),

    #[error("invalid record id: {0:?}")]
    InvalidGuid(String),
}
