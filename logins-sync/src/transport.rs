//! Storage server abstraction.
//!
//! The coordinator talks to the server only through [`SyncClient`]. Retries,
//! backoff and HTTP details belong to the implementation; by the time an
//! error reaches the coordinator it is final for this pass.

use crate::auth::AuthInfo;
use crate::error::SyncResult;
use crate::payload::{IncomingEnvelope, OutgoingRecord};
use async_trait::async_trait;
use logins_store::sync::SyncIds;
use logins_types::{Guid, ServerTimestamp};

/// HTTP status for an upload whose `if_unmodified_since` no longer holds.
pub const PRECONDITION_FAILED: u16 = 412;

/// Records changed on the server since a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChanges {
    pub records: Vec<IncomingEnvelope>,
    /// Server time when the response was produced. The checkpoint moves
    /// here once the records are merged.
    pub timestamp: ServerTimestamp,
    /// The ids the collection currently lives under.
    pub sync_ids: SyncIds,
}

/// Outcome of one upload batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadResult {
    /// Server time the accepted records were written at.
    pub timestamp: ServerTimestamp,
    pub success: Vec<Guid>,
    pub failed: Vec<Guid>,
}

/// A connection to the sync storage server.
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Fetches every record in `collection` modified after `since`.
    async fn fetch_changes(
        &self,
        auth: &AuthInfo,
        collection: &str,
        since: ServerTimestamp,
    ) -> SyncResult<ServerChanges>;

    /// Uploads one batch. Individual records may be rejected without the
    /// whole batch failing.
    ///
    /// The batch is refused with [`PRECONDITION_FAILED`] if anything in
    /// `collection` was written after `if_unmodified_since`, so a write from
    /// another client can never land between our fetch and our checkpoint.
    async fn upload(
        &self,
        auth: &AuthInfo,
        collection: &str,
        batch: &[OutgoingRecord],
        if_unmodified_since: ServerTimestamp,
    ) -> SyncResult<UploadResult>;
}

/// An in-memory server for tests.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use logins_types::{Login, now_millis};
    use std::collections::{BTreeMap, HashSet};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Gap between consecutive server writes, milliseconds.
    const TICK: i64 = 10;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoredRecord {
        pub payload: String,
        pub modified: ServerTimestamp,
        pub sortindex: i32,
    }

    #[derive(Debug)]
    struct ServerState {
        records: BTreeMap<Guid, StoredRecord>,
        clock: i64,
        /// Time of the last write to the collection.
        last_modified: ServerTimestamp,
        sync_ids: SyncIds,
        reject_auth: bool,
        failing_ids: HashSet<Guid>,
        next_fetch_error: Option<SyncError>,
        next_upload_error: Option<SyncError>,
        fetches: usize,
        upload_batches: usize,
    }

    impl ServerState {
        fn tick(&mut self) -> ServerTimestamp {
            self.clock = (self.clock + TICK).max(now_millis());
            ServerTimestamp(self.clock)
        }

        fn check_auth(&self, auth: &AuthInfo) -> SyncResult<()> {
            if self.reject_auth || auth.access_token.is_empty() {
                return Err(SyncError::AuthInvalid("token rejected by storage server".into()));
            }
            Ok(())
        }
    }

    /// One collection on a fake storage server.
    #[derive(Debug)]
    pub struct InMemoryServer {
        state: Mutex<ServerState>,
    }

    impl Default for InMemoryServer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemoryServer {
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: Mutex::new(ServerState {
                    records: BTreeMap::new(),
                    clock: now_millis(),
                    last_modified: ServerTimestamp(0),
                    sync_ids: SyncIds {
                        global: Guid::random().into_string(),
                        collection: Guid::random().into_string(),
                    },
                    reject_auth: false,
                    failing_ids: HashSet::new(),
                    next_fetch_error: None,
                    next_upload_error: None,
                    fetches: 0,
                    upload_batches: 0,
                }),
            }
        }

        fn state(&self) -> MutexGuard<'_, ServerState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        // ── Seeding ──────────────────────────────────────────────

        /// Stores `login` as if another client uploaded it.
        pub fn insert_login(&self, login: Login) -> SyncResult<ServerTimestamp> {
            Ok(self.put(OutgoingRecord::from_login(login)?))
        }

        /// Stores a tombstone for `id`.
        pub fn insert_tombstone(&self, id: &Guid) -> SyncResult<ServerTimestamp> {
            Ok(self.put(OutgoingRecord::tombstone(id.clone())?))
        }

        /// Stores a raw JSON body under `id`, valid or not.
        pub fn insert_payload(&self, id: Guid, payload: impl Into<String>) -> ServerTimestamp {
            self.put(OutgoingRecord {
                id,
                payload: payload.into(),
                sortindex: crate::payload::DEFAULT_SORTINDEX,
            })
        }

        fn put(&self, record: OutgoingRecord) -> ServerTimestamp {
            let mut state = self.state();
            let modified = state.tick();
            state.last_modified = modified;
            state.records.insert(
                record.id,
                StoredRecord {
                    payload: record.payload,
                    modified,
                    sortindex: record.sortindex,
                },
            );
            modified
        }

        /// Replaces the collection's sync ids, as a node reassignment or a
        /// wipe by another client would.
        pub fn set_sync_ids(&self, ids: SyncIds) {
            self.state().sync_ids = ids;
        }

        #[must_use]
        pub fn sync_ids(&self) -> SyncIds {
            self.state().sync_ids.clone()
        }

        // ── Failure injection ────────────────────────────────────

        pub fn set_reject_auth(&self, reject: bool) {
            self.state().reject_auth = reject;
        }

        /// Uploads of `id` are refused until cleared.
        pub fn fail_uploads_of(&self, id: &Guid) {
            self.state().failing_ids.insert(id.clone());
        }

        pub fn clear_upload_failures(&self) {
            self.state().failing_ids.clear();
        }

        pub fn fail_next_fetch(&self, error: SyncError) {
            self.state().next_fetch_error = Some(error);
        }

        pub fn fail_next_upload(&self, error: SyncError) {
            self.state().next_upload_error = Some(error);
        }

        // ── Inspection ───────────────────────────────────────────

        #[must_use]
        pub fn record(&self, id: &Guid) -> Option<StoredRecord> {
            self.state().records.get(id).cloned()
        }

        /// The stored body of `id`, parsed.
        #[must_use]
        pub fn payload_json(&self, id: &Guid) -> Option<serde_json::Value> {
            self.record(id)
                .and_then(|r| serde_json::from_str(&r.payload).ok())
        }

        #[must_use]
        pub fn ids(&self) -> Vec<Guid> {
            self.state().records.keys().cloned().collect()
        }

        #[must_use]
        pub fn len(&self) -> usize {
            self.state().records.len()
        }

        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        #[must_use]
        pub fn now(&self) -> ServerTimestamp {
            ServerTimestamp(self.state().clock)
        }

        #[must_use]
        pub fn fetches(&self) -> usize {
            self.state().fetches
        }

        #[must_use]
        pub fn upload_batches(&self) -> usize {
            self.state().upload_batches
        }
    }

    #[async_trait]
    impl SyncClient for InMemoryServer {
        async fn fetch_changes(
            &self,
            auth: &AuthInfo,
            _collection: &str,
            since: ServerTimestamp,
        ) -> SyncResult<ServerChanges> {
            let mut state = self.state();
            state.check_auth(auth)?;
            if let Some(error) = state.next_fetch_error.take() {
                return Err(error);
            }
            state.fetches += 1;
            let mut records: Vec<_> = state
                .records
                .iter()
                .filter(|(_, r)| r.modified > since)
                .map(|(id, r)| IncomingEnvelope {
                    id: id.clone(),
                    modified: r.modified,
                    payload: r.payload.clone(),
                })
                .collect();
            records.sort_by_key(|r| r.modified);
            Ok(ServerChanges {
                records,
                timestamp: ServerTimestamp(state.clock),
                sync_ids: state.sync_ids.clone(),
            })
        }

        async fn upload(
            &self,
            auth: &AuthInfo,
            _collection: &str,
            batch: &[OutgoingRecord],
            if_unmodified_since: ServerTimestamp,
        ) -> SyncResult<UploadResult> {
            let mut state = self.state();
            state.check_auth(auth)?;
            if let Some(error) = state.next_upload_error.take() {
                return Err(error);
            }
            if state.last_modified > if_unmodified_since {
                return Err(SyncError::Http {
                    status: PRECONDITION_FAILED,
                });
            }
            state.upload_batches += 1;
            let timestamp = state.tick();
            let mut result = UploadResult {
                timestamp,
                ..UploadResult::default()
            };
            for record in batch {
                if state.failing_ids.contains(&record.id) {
                    result.failed.push(record.id.clone());
                    continue;
                }
                state.records.insert(
                    record.id.clone(),
                    StoredRecord {
                        payload: record.payload.clone(),
                        modified: timestamp,
                        sortindex: record.sortindex,
                    },
                );
                result.success.push(record.id.clone());
            }
            if !result.success.is_empty() {
                state.last_modified = timestamp;
            }
            Ok(result)
        }
    }
}
