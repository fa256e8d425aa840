//! Sync engine for the logins store.
//!
//! Keeps a [`LoginStore`](logins_store::LoginStore) in step with a sync
//! storage server that other devices share.
//!
//! # Architecture
//!
//! - **Payload**: the server's JSON record format and its parsing
//! - **Merge**: field-level three-way merge of two changed logins
//! - **Plan**: per-record decisions (merge, dedupe, delete) as store ops
//! - **Engine**: applies plans to the store, gathers outgoing changes
//! - **Coordinator**: runs a whole pass against the auth and transport
//!   collaborators and reports telemetry
//!
//! ## Sync pass
//!
//! 1. **Auth**: ask the [`TokenProvider`] for credentials
//! 2. **Fetch**: everything modified since the checkpoint; reset local sync
//!    state first if the server's sync ids changed
//! 3. **Merge**: each record against the local and mirror rows, one
//!    transaction per record
//! 4. **Upload**: local changes in batches, moving accepted records into the
//!    mirror
//! 5. **Checkpoint**: advance only after all of the above succeeded
//!
//! # Example
//!
//! ```no_run
//! use logins_store::LoginStore;
//! use logins_sync::mock::InMemoryServer;
//! use logins_sync::{AuthInfo, StaticTokenProvider, SyncConfig, SyncCoordinator};
//! use std::sync::Arc;
//!
//! # async fn run(key: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LoginStore::open("logins.db")?);
//! store.unlock(key)?;
//!
//! let tokens = Arc::new(StaticTokenProvider::new(AuthInfo {
//!     key_id: "kid".into(),
//!     access_token: "token".into(),
//!     sync_key: "sync-key".into(),
//!     token_server_url: "https://token.example.com".into(),
//! }));
//! let coordinator = SyncCoordinator::new(
//!     store,
//!     tokens,
//!     Arc::new(InMemoryServer::new()),
//!     SyncConfig::default(),
//! );
//! let ping = coordinator.sync().await?;
//! println!("uploaded {}", ping.uploaded());
//! # Ok(())
//! # }
//! ```

mod auth;
mod coordinator;
mod engine;
mod error;
pub mod merge;
pub mod payload;
pub mod plan;
pub mod telemetry;
pub mod transport;

pub use auth::{AuthInfo, StaticTokenProvider, TokenProvider};
pub use coordinator::{DEFAULT_BATCH_SIZE, SyncConfig, SyncCoordinator, SyncPhase};
pub use engine::{ENGINE_NAME, IncomingSummary, LoginsSyncEngine, OutgoingSummary};
pub use error::{SyncError, SyncResult};
pub use merge::{LoginDelta, TieBreak, three_way_merge};
pub use payload::{IncomingEnvelope, IncomingPayload, IncomingRecord, LoginPayload, OutgoingRecord};
pub use telemetry::{
    EngineIncoming, EngineOutgoing, FailureReason, SyncTelemetryPing, TelemetryAggregator,
    TelemetrySink, TelemetryTotals,
};
pub use transport::{ServerChanges, SyncClient, UploadResult, mock};
