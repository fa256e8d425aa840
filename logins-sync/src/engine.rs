//! The logins sync engine: blocking, storage-facing half of a sync pass.
//!
//! [`LoginsSyncEngine`] turns incoming server records into
//! [`SyncOp`](logins_store::sync::SyncOp)s via
//! the planners in [`crate::plan`], applies them one record per transaction,
//! and gathers local changes for upload. It does no I/O beyond the store;
//! the coordinator runs it on the blocking pool.

use crate::error::SyncResult;
use crate::merge::TieBreak;
use crate::payload::{IncomingEnvelope, IncomingPayload, IncomingRecord, OutgoingRecord};
use crate::plan::{
    MergeClock, Outcome, Plan, plan_delete, plan_dedupe, plan_local_tombstone,
    plan_mirror_insert, plan_mirror_update, plan_same_username_dupe, plan_three_way_merge,
    plan_two_way_merge,
};
use crate::telemetry::EngineIncoming;
use logins_crypto::EncryptorDecryptor;
use logins_store::sync::{LocalRow, OutgoingChange, RowState, SyncAssociation, SyncIds};
use logins_store::{InterruptScope, LoginDb, LoginStore, LoginsError, LoginsResult};
use logins_types::{Guid, Login, ServerTimestamp, StoreEvent, now_millis};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name the engine reports itself under.
pub const ENGINE_NAME: &str = "passwords";

/// What applying one batch of incoming records did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncomingSummary {
    pub incoming: EngineIncoming,
    /// Local rows dropped because they no longer decrypt.
    pub local_deleted: u32,
    /// Mirror rows dropped because they no longer decrypt.
    pub mirror_deleted: u32,
}

/// Local changes ready for upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingSummary {
    pub records: Vec<OutgoingRecord>,
    /// Local rows dropped because they no longer decrypt.
    pub local_deleted: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct Dropped {
    local: bool,
    mirror: bool,
}

/// Merges server records into a [`LoginStore`].
#[derive(Clone)]
pub struct LoginsSyncEngine {
    store: Arc<LoginStore>,
    tie_break: TieBreak,
}

impl std::fmt::Debug for LoginsSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginsSyncEngine")
            .field("tie_break", &self.tie_break)
            .finish_non_exhaustive()
    }
}

impl LoginsSyncEngine {
    #[must_use]
    pub fn new(store: Arc<LoginStore>, tie_break: TieBreak) -> Self {
        Self { store, tie_break }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<LoginStore> {
        &self.store
    }

    // ── Incoming ─────────────────────────────────────────────────

    /// Merges `envelopes` into the store. `server_now` is the server's clock
    /// at fetch time.
    ///
    /// Malformed records are counted as failed and skipped. Rows that no
    /// longer decrypt are dropped and counted. Any other storage error ends
    /// the batch; records already merged stay merged.
    pub fn apply_incoming(
        &self,
        envelopes: Vec<IncomingEnvelope>,
        server_now: ServerTimestamp,
        scope: &InterruptScope,
    ) -> SyncResult<IncomingSummary> {
        let clock = MergeClock {
            now: now_millis(),
            server_now,
            tie_break: self.tie_break,
        };
        let mut summary = IncomingSummary::default();
        for envelope in envelopes {
            scope.err_if_interrupted()?;
            let record = IncomingRecord::from_envelope(envelope);
            let id = record.id.clone();
            let result = self
                .store
                .with_unlocked(|db, encdec| merge_record(db, encdec, record, &clock, scope));
            let (outcome, dropped) = match result {
                Ok(Some(merged)) => merged,
                Ok(None) => {
                    summary.incoming.failed += 1;
                    continue;
                }
                Err(LoginsError::InvalidRecord(e)) => {
                    warn!(%id, "incoming record failed validation: {e}");
                    summary.incoming.failed += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.note_dropped(&id, dropped, &mut summary);
            let event = match outcome {
                Outcome::Applied => {
                    summary.incoming.applied += 1;
                    StoreEvent::Applied { id }
                }
                Outcome::Reconciled => {
                    summary.incoming.reconciled += 1;
                    StoreEvent::Reconciled { id }
                }
            };
            self.store.outbox().push(event);
        }
        info!(
            applied = summary.incoming.applied,
            reconciled = summary.incoming.reconciled,
            failed = summary.incoming.failed,
            "applied incoming records"
        );
        Ok(summary)
    }

    fn note_dropped(&self, id: &Guid, dropped: Dropped, summary: &mut IncomingSummary) {
        if dropped.local {
            summary.local_deleted += 1;
            self.store.outbox().push(StoreEvent::Undecryptable {
                id: id.clone(),
                mirror: false,
            });
        }
        if dropped.mirror {
            summary.mirror_deleted += 1;
            self.store.outbox().push(StoreEvent::Undecryptable {
                id: id.clone(),
                mirror: true,
            });
        }
    }

    // ── Outgoing ─────────────────────────────────────────────────

    /// Every local change waiting for upload.
    pub fn fetch_outgoing(&self, scope: &InterruptScope) -> SyncResult<OutgoingSummary> {
        let outgoing = self
            .store
            .with_unlocked(|db, encdec| db.fetch_outgoing(encdec, scope))?;
        for id in &outgoing.undecryptable {
            self.store.outbox().push(StoreEvent::Undecryptable {
                id: id.clone(),
                mirror: false,
            });
        }
        let records = outgoing
            .changes
            .into_iter()
            .map(|change| match change {
                OutgoingChange::Upsert(login) => OutgoingRecord::from_login(login),
                OutgoingChange::Tombstone(id) => OutgoingRecord::tombstone(id),
            })
            .collect::<serde_json::Result<Vec<_>>>()?;
        debug!(count = records.len(), "gathered outgoing records");
        Ok(OutgoingSummary {
            records,
            local_deleted: u32::try_from(outgoing.undecryptable.len()).unwrap_or(u32::MAX),
        })
    }

    /// Records that the server accepted `ids` at `server_modified`.
    pub fn mark_uploaded(
        &self,
        ids: &[Guid],
        server_modified: ServerTimestamp,
        scope: &InterruptScope,
    ) -> SyncResult<()> {
        Ok(self
            .store
            .with_unlocked(|db, _| db.mark_as_synchronized(ids, server_modified, scope))?)
    }

    // ── Sync metadata ────────────────────────────────────────────

    pub fn last_sync(&self) -> SyncResult<ServerTimestamp> {
        Ok(self.store.with_unlocked(|db, _| db.last_sync())?)
    }

    pub fn set_last_sync(&self, last_sync: ServerTimestamp) -> SyncResult<()> {
        Ok(self.store.with_unlocked(|db, _| db.set_last_sync(last_sync))?)
    }

    /// Binds the store to the server's sync ids. When they differ from the
    /// stored ones, sync state is reset first and `true` is returned: every
    /// local record will be uploaded again and the checkpoint is back at 0.
    pub fn ensure_sync_ids(&self, server: &SyncIds) -> SyncResult<bool> {
        Ok(self.store.with_unlocked(|db, _| {
            if db.sync_ids()?.as_ref() == Some(server) {
                return Ok(false);
            }
            info!("collection sync ids changed, resetting sync state");
            db.reset(&SyncAssociation::Connected(server.clone()))?;
            Ok(true)
        })?)
    }

    /// Forgets all sync state without touching login data.
    pub fn reset(&self, assoc: &SyncAssociation) -> SyncResult<()> {
        Ok(self.store.with_unlocked(|db, _| db.reset(assoc))?)
    }
}

/// Plans and applies one incoming record. `None` means the record was
/// malformed and nothing was written.
fn merge_record(
    db: &LoginDb,
    encdec: &dyn EncryptorDecryptor,
    record: IncomingRecord,
    clock: &MergeClock,
    scope: &InterruptScope,
) -> LoginsResult<Option<(Outcome, Dropped)>> {
    let IncomingRecord {
        id,
        payload,
        modified,
    } = record;
    let upstream = match payload {
        IncomingPayload::Malformed(_) => {
            // Reason omitted, it can quote field values.
            warn!(%id, "skipping malformed incoming record");
            return Ok(None);
        }
        IncomingPayload::Tombstone => None,
        IncomingPayload::Record(login) => Some(login),
    };

    let rows = db.fetch_sync_rows(&id, encdec)?;
    let mut dropped = Dropped::default();
    if matches!(rows.local, RowState::Undecryptable) {
        warn!(%id, "dropping undecryptable local row");
        db.delete_local_row(&id)?;
        dropped.local = true;
    }
    if matches!(rows.mirror, RowState::Undecryptable) {
        warn!(%id, "dropping undecryptable mirror row");
        db.delete_mirror_row(&id)?;
        dropped.mirror = true;
    }

    let Some(upstream) = upstream else {
        debug!(%id, "incoming tombstone");
        let plan = plan_delete(&id);
        db.apply_sync_ops(&plan.ops, encdec, scope)?;
        return Ok(Some((plan.outcome, dropped)));
    };

    let plan = match (rows.local.into_option(), rows.mirror.into_option()) {
        (
            Some(LocalRow::Alive {
                login,
                local_modified,
                ..
            }),
            Some(mirror),
        ) => {
            debug!(%id, "three-way merge");
            plan_three_way_merge(&login, local_modified, &mirror, upstream, modified, clock)
        }
        (Some(LocalRow::Alive { login, .. }), None) => {
            debug!(%id, "two-way merge");
            plan_two_way_merge(&login, upstream, modified, clock)
        }
        (Some(LocalRow::Tombstone { local_modified, .. }), mirror) => {
            debug!(%id, "incoming change to a locally deleted record");
            plan_local_tombstone(local_modified, mirror.as_ref(), upstream, modified, clock)
        }
        (None, Some(_)) => plan_mirror_update(upstream, modified),
        (None, None) => plan_new_record(db, encdec, upstream, modified, clock)?,
    };
    db.apply_sync_ops(&plan.ops, encdec, scope)?;
    Ok(Some((plan.outcome, dropped)))
}

/// A record this store has never seen. It may still duplicate one it has.
fn plan_new_record(
    db: &LoginDb,
    encdec: &dyn EncryptorDecryptor,
    upstream: Login,
    modified: ServerTimestamp,
    clock: &MergeClock,
) -> LoginsResult<Plan> {
    let mut other_username = None;
    for candidate in db.potential_dupes_ignoring_username(upstream.guid(), &upstream.fields)? {
        let candidate_id = candidate.guid().clone();
        let existing = match candidate.decrypt(encdec) {
            Ok(login) => login,
            Err(LoginsError::DecryptionFailed(_)) => continue,
            Err(e) => return Err(e),
        };
        if existing.username() == upstream.username() {
            let is_synced = !db.fetch_sync_rows(&candidate_id, encdec)?.mirror.is_absent();
            debug!(id = %upstream.guid(), dupe = %candidate_id, "incoming record duplicates a local one");
            return Ok(plan_same_username_dupe(
                &existing, is_synced, upstream, modified, clock,
            ));
        }
        other_username.get_or_insert(existing);
    }
    Ok(match other_username {
        Some(existing) => {
            debug!(
                id = %upstream.guid(),
                dupe = %existing.guid(),
                "incoming record shares a site with a local one"
            );
            plan_dedupe(&existing, upstream, modified, clock)
        }
        None => plan_mirror_insert(upstream, modified),
    })
}
