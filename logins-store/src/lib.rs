//! Encrypted login storage.
//!
//! [`LoginStore`] is the handle hosts use: it owns one SQLite database,
//! tracks whether it is locked, and guards every call with a single mutex.
//! Logins live in two tables:
//! - a local overlay of changes not yet synced (including tombstones)
//! - a mirror of the last state agreed with the sync server
//!
//! Usernames and passwords are encrypted at rest with the store key. The key
//! itself is managed by the host; the store only validates it against a
//! canary (see [`KeyValidity`]), regenerates it when lost, and rekeys.
//!
//! The [`sync`] module exposes the row-level primitives the sync engine
//! builds on.

mod db;
mod encrypted;
mod error;
mod interrupt;
mod key_manager;
mod schema;
mod store;
pub mod sync;

pub use db::{ImportMetrics, LoginDb};
pub use encrypted::{EncryptedLogin, SyncStatus};
pub use error::{LoginsError, LoginsResult};
pub use interrupt::{InterruptHandle, InterruptScope};
pub use key_manager::KeyValidity;
pub use store::{KeyEventSink, LoginStore};
