//! Row-level access for the sync engine.
//!
//! The merge logic lives in `logins-sync`; this module gives it the raw
//! material (local and mirror rows for an id, outgoing changes, sync
//! metadata) and applies the [`SyncOp`]s it decides on, one transaction per
//! batch of ops.

use crate::db::{CLONE_ENTIRE_MIRROR_SQL, CLONE_SINGLE_MIRROR_SQL, LoginDb, repeat_sql_vars};
use crate::encrypted::{EncryptedLogin, SyncStatus};
use crate::error::{LoginsError, LoginsResult};
use crate::interrupt::InterruptScope;
use crate::schema::{
    COLLECTION_SYNCID_META_KEY, COMMON_COLS, GLOBAL_SYNCID_META_KEY, LAST_SYNC_META_KEY,
};
use logins_crypto::EncryptorDecryptor;
use logins_types::{Guid, Login, ServerTimestamp, now_millis};
use rusqlite::{Row, named_params, params_from_iter};
use std::sync::LazyLock;
use tracing::{debug, info, trace, warn};

/// Upper bound on bound parameters per statement.
const MAX_VARIABLES_PER_QUERY: usize = 500;

static GET_LOCAL_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {COMMON_COLS}, local_modified, is_deleted, sync_status
         FROM loginsL WHERE guid = :guid"
    )
});

static GET_MIRROR_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {COMMON_COLS}, server_modified, is_overridden
         FROM loginsM WHERE guid = :guid"
    )
});

static GET_OUTGOING_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {COMMON_COLS}, is_deleted FROM loginsL WHERE sync_status != {synced}",
        synced = SyncStatus::Synced as u8
    )
});

/// The pair of ids that ties local sync state to one server collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIds {
    pub global: String,
    pub collection: String,
}

/// What [`LoginDb::reset`] should leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAssociation {
    /// No account; clear the stored sync ids.
    Disconnected,
    /// Bind local state to these ids.
    Connected(SyncIds),
}

/// The `loginsL` row for an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalRow {
    Alive {
        login: Login,
        /// Milliseconds, 0 when never modified locally.
        local_modified: i64,
        sync_status: SyncStatus,
    },
    Tombstone {
        id: Guid,
        local_modified: i64,
    },
}

impl LocalRow {
    #[must_use]
    pub fn local_modified(&self) -> i64 {
        match self {
            Self::Alive { local_modified, .. } | Self::Tombstone { local_modified, .. } => {
                *local_modified
            }
        }
    }
}

/// The `loginsM` row for an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorRow {
    pub login: Login,
    pub server_modified: ServerTimestamp,
    pub is_overridden: bool,
}

/// A row as seen by sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowState<T> {
    Absent,
    Present(T),
    /// The row exists but its secure fields don't decrypt under the current
    /// key.
    Undecryptable,
}

impl<T> RowState<T> {
    /// The row, treating undecryptable rows as missing.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(row) => Some(row),
            Self::Absent | Self::Undecryptable => None,
        }
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Everything stored locally for one id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRows {
    pub local: RowState<LocalRow>,
    pub mirror: RowState<MirrorRow>,
}

/// A local change waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingChange {
    Upsert(Login),
    Tombstone(Guid),
}

impl OutgoingChange {
    #[must_use]
    pub fn id(&self) -> &Guid {
        match self {
            Self::Upsert(login) => login.guid(),
            Self::Tombstone(id) => id,
        }
    }
}

/// Result of [`LoginDb::fetch_outgoing`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outgoing {
    pub changes: Vec<OutgoingChange>,
    /// Local rows dropped because they no longer decrypt.
    pub undecryptable: Vec<Guid>,
}

/// A single storage step decided by the merge engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    DeleteLocal(Guid),
    DeleteMirror(Guid),
    InsertMirror {
        login: Login,
        server_modified: ServerTimestamp,
        is_overridden: bool,
    },
    /// Zero timestamps and usage counts in `login` keep the stored values.
    UpdateMirror {
        login: Login,
        server_modified: ServerTimestamp,
        /// `None` leaves the flag as it is.
        is_overridden: Option<bool>,
    },
    /// Writes a merged login into the local overlay, creating it from the
    /// mirror (or from scratch) when missing, and marks it changed.
    UpdateLocal { login: Login },
    /// Replaces any local row with a tombstone and overrides the mirror row.
    InsertLocalTombstone(Guid),
}

impl SyncOp {
    /// The record this op touches.
    #[must_use]
    pub fn id(&self) -> &Guid {
        match self {
            Self::DeleteLocal(id) | Self::DeleteMirror(id) | Self::InsertLocalTombstone(id) => id,
            Self::InsertMirror { login, .. }
            | Self::UpdateMirror { login, .. }
            | Self::UpdateLocal { login } => login.guid(),
        }
    }
}

impl LoginDb {
    /// Loads the local and mirror rows for `id`.
    pub fn fetch_sync_rows(
        &self,
        id: &Guid,
        encdec: &dyn EncryptorDecryptor,
    ) -> LoginsResult<SyncRows> {
        let local = {
            let mut stmt = self.conn.prepare_cached(&GET_LOCAL_SQL)?;
            let mut rows =
                stmt.query_and_then(named_params! { ":guid": id.as_str() }, |row| {
                    local_row_from(row, encdec)
                })?;
            rows.next().transpose()?.unwrap_or(RowState::Absent)
        };
        let mirror = {
            let mut stmt = self.conn.prepare_cached(&GET_MIRROR_SQL)?;
            let mut rows =
                stmt.query_and_then(named_params! { ":guid": id.as_str() }, |row| {
                    mirror_row_from(row, encdec)
                })?;
            rows.next().transpose()?.unwrap_or(RowState::Absent)
        };
        Ok(SyncRows { local, mirror })
    }

    pub fn delete_local_row(&self, id: &Guid) -> LoginsResult<()> {
        self.conn.execute(
            "DELETE FROM loginsL WHERE guid = :guid",
            named_params! { ":guid": id.as_str() },
        )?;
        Ok(())
    }

    pub fn delete_mirror_row(&self, id: &Guid) -> LoginsResult<()> {
        self.conn.execute(
            "DELETE FROM loginsM WHERE guid = :guid",
            named_params! { ":guid": id.as_str() },
        )?;
        Ok(())
    }

    /// Applies `ops` in order inside a single transaction.
    pub fn apply_sync_ops(
        &self,
        ops: &[SyncOp],
        encdec: &dyn EncryptorDecryptor,
        scope: &InterruptScope,
    ) -> LoginsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_millis();
        for op in ops {
            scope.err_if_interrupted()?;
            trace!(id = %op.id(), "applying sync op");
            self.apply_sync_op(op, encdec, now)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn apply_sync_op(
        &self,
        op: &SyncOp,
        encdec: &dyn EncryptorDecryptor,
        now: i64,
    ) -> LoginsResult<()> {
        match op {
            SyncOp::DeleteLocal(id) => self.delete_local_row(id),
            SyncOp::DeleteMirror(id) => self.delete_mirror_row(id),
            SyncOp::InsertMirror {
                login,
                server_modified,
                is_overridden,
            } => {
                let enc = EncryptedLogin::encrypt(login.clone(), encdec)?;
                self.conn.execute(
                    "INSERT OR REPLACE INTO loginsM (
                         is_overridden, server_modified, httpRealm, formActionOrigin,
                         usernameField, passwordField, origin, secFields, timesUsed,
                         timeLastUsed, timePasswordChanged, timeCreated, guid
                     ) VALUES (
                         :is_overridden, :server_modified, :http_realm, :form_action_origin,
                         :username_field, :password_field, :origin, :sec_fields, :times_used,
                         :time_last_used, :time_password_changed, :time_created, :guid
                     )",
                    named_params! {
                        ":is_overridden": is_overridden,
                        ":server_modified": server_modified.as_millis(),
                        ":http_realm": enc.fields.http_realm,
                        ":form_action_origin": enc.fields.form_action_origin,
                        ":username_field": enc.fields.username_field,
                        ":password_field": enc.fields.password_field,
                        ":origin": enc.fields.origin,
                        ":sec_fields": enc.sec_fields,
                        ":times_used": enc.record.times_used,
                        ":time_last_used": enc.record.time_last_used,
                        ":time_password_changed": enc.record.time_password_changed,
                        ":time_created": enc.record.time_created,
                        ":guid": enc.guid().as_str(),
                    },
                )?;
                Ok(())
            }
            SyncOp::UpdateMirror {
                login,
                server_modified,
                is_overridden,
            } => {
                let enc = EncryptedLogin::encrypt(login.clone(), encdec)?;
                self.conn.execute(
                    "UPDATE loginsM
                     SET server_modified     = :server_modified,
                         httpRealm           = :http_realm,
                         formActionOrigin    = :form_action_origin,
                         usernameField       = :username_field,
                         passwordField       = :password_field,
                         origin              = :origin,
                         secFields           = :sec_fields,
                         is_overridden       = coalesce(:is_overridden, is_overridden),
                         -- Older clients may write zeroes; keep what we had.
                         timesUsed           = coalesce(nullif(:times_used, 0), timesUsed),
                         timeLastUsed        = coalesce(nullif(:time_last_used, 0), timeLastUsed),
                         timePasswordChanged = coalesce(nullif(:time_password_changed, 0), timePasswordChanged),
                         timeCreated         = coalesce(nullif(:time_created, 0), timeCreated)
                     WHERE guid = :guid",
                    named_params! {
                        ":server_modified": server_modified.as_millis(),
                        ":http_realm": enc.fields.http_realm,
                        ":form_action_origin": enc.fields.form_action_origin,
                        ":username_field": enc.fields.username_field,
                        ":password_field": enc.fields.password_field,
                        ":origin": enc.fields.origin,
                        ":sec_fields": enc.sec_fields,
                        ":is_overridden": is_overridden,
                        ":times_used": enc.record.times_used,
                        ":time_last_used": enc.record.time_last_used,
                        ":time_password_changed": enc.record.time_password_changed,
                        ":time_created": enc.record.time_created,
                        ":guid": enc.guid().as_str(),
                    },
                )?;
                Ok(())
            }
            SyncOp::UpdateLocal { login } => self.upsert_local(login, encdec, now),
            SyncOp::InsertLocalTombstone(id) => {
                self.conn.execute(
                    &format!(
                        "INSERT OR REPLACE INTO loginsL
                             (guid, local_modified, is_deleted, sync_status, origin,
                              timeCreated, timePasswordChanged, secFields)
                         VALUES (:guid, :now, 1, {changed}, '', :now, :now, '')",
                        changed = SyncStatus::Changed as u8
                    ),
                    named_params! { ":guid": id.as_str(), ":now": now },
                )?;
                self.mark_mirror_overridden(id.as_str())
            }
        }
    }

    fn upsert_local(
        &self,
        login: &Login,
        encdec: &dyn EncryptorDecryptor,
        now: i64,
    ) -> LoginsResult<()> {
        let enc = EncryptedLogin::encrypt(login.clone(), encdec)?;
        let guid = enc.guid().as_str();
        self.conn
            .execute(&CLONE_SINGLE_MIRROR_SQL, named_params! { ":guid": guid })?;
        self.mark_mirror_overridden(guid)?;
        let changed = self.conn.execute(
            &format!(
                "UPDATE loginsL
                 SET local_modified      = :now,
                     httpRealm           = :http_realm,
                     formActionOrigin    = :form_action_origin,
                     usernameField       = :username_field,
                     passwordField       = :password_field,
                     timeLastUsed        = :time_last_used,
                     timePasswordChanged = :time_password_changed,
                     timesUsed           = :times_used,
                     origin              = :origin,
                     secFields           = :sec_fields,
                     is_deleted          = 0,
                     sync_status         = max(sync_status, {changed})
                 WHERE guid = :guid",
                changed = SyncStatus::Changed as u8
            ),
            named_params! {
                ":now": now,
                ":http_realm": enc.fields.http_realm,
                ":form_action_origin": enc.fields.form_action_origin,
                ":username_field": enc.fields.username_field,
                ":password_field": enc.fields.password_field,
                ":time_last_used": enc.record.time_last_used,
                ":time_password_changed": enc.record.time_password_changed,
                ":times_used": enc.record.times_used,
                ":origin": enc.fields.origin,
                ":sec_fields": enc.sec_fields,
                ":guid": guid,
            },
        )?;
        if changed == 0 {
            self.conn.execute(
                &format!(
                    "INSERT INTO loginsL (
                         origin, httpRealm, formActionOrigin, usernameField, passwordField,
                         timesUsed, secFields, guid, timeCreated, timeLastUsed,
                         timePasswordChanged, local_modified, is_deleted, sync_status
                     ) VALUES (
                         :origin, :http_realm, :form_action_origin, :username_field,
                         :password_field, :times_used, :sec_fields, :guid, :time_created,
                         :time_last_used, :time_password_changed, :now, 0, {new}
                     )",
                    new = SyncStatus::New as u8
                ),
                named_params! {
                    ":origin": enc.fields.origin,
                    ":http_realm": enc.fields.http_realm,
                    ":form_action_origin": enc.fields.form_action_origin,
                    ":username_field": enc.fields.username_field,
                    ":password_field": enc.fields.password_field,
                    ":times_used": enc.record.times_used,
                    ":sec_fields": enc.sec_fields,
                    ":guid": guid,
                    ":time_created": enc.record.time_created,
                    ":time_last_used": enc.record.time_last_used,
                    ":time_password_changed": enc.record.time_password_changed,
                    ":now": now,
                },
            )?;
        }
        Ok(())
    }

    /// Local rows that need uploading. Rows that no longer decrypt are
    /// deleted and reported instead.
    pub fn fetch_outgoing(
        &self,
        encdec: &dyn EncryptorDecryptor,
        scope: &InterruptScope,
    ) -> LoginsResult<Outgoing> {
        let rows = {
            let mut stmt = self.conn.prepare_cached(&GET_OUTGOING_SQL)?;
            let rows = stmt.query_and_then([], |row| {
                scope.err_if_interrupted()?;
                let is_deleted: bool = row.get("is_deleted")?;
                Ok::<_, LoginsError>((EncryptedLogin::from_row(row)?, is_deleted))
            })?;
            rows.collect::<LoginsResult<Vec<_>>>()?
        };

        let mut outgoing = Outgoing::default();
        for (enc, is_deleted) in rows {
            if is_deleted {
                outgoing.changes.push(OutgoingChange::Tombstone(enc.record.id));
                continue;
            }
            match enc.clone().decrypt(encdec) {
                Ok(login) => outgoing.changes.push(OutgoingChange::Upsert(login)),
                Err(LoginsError::DecryptionFailed(_)) => {
                    warn!(id = %enc.guid(), "dropping undecryptable local login");
                    self.delete_local_row(enc.guid())?;
                    outgoing.undecryptable.push(enc.record.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outgoing)
    }

    /// Moves uploaded records into the mirror at `server_modified` and drops
    /// their local rows. Uploaded tombstones simply disappear.
    pub fn mark_as_synchronized(
        &self,
        ids: &[Guid],
        server_modified: ServerTimestamp,
        scope: &InterruptScope,
    ) -> LoginsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for chunk in ids.chunks(MAX_VARIABLES_PER_QUERY) {
            let vars = repeat_sql_vars(chunk.len());
            let params = || params_from_iter(chunk.iter().map(Guid::as_str));
            self.conn
                .execute(&format!("DELETE FROM loginsM WHERE guid IN ({vars})"), params())?;
            scope.err_if_interrupted()?;
            self.conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO loginsM ({COMMON_COLS}, is_overridden, server_modified)
                     SELECT {COMMON_COLS}, 0, {modified}
                     FROM loginsL
                     WHERE is_deleted = 0 AND guid IN ({vars})",
                    modified = server_modified.as_millis()
                ),
                params(),
            )?;
            scope.err_if_interrupted()?;
            self.conn
                .execute(&format!("DELETE FROM loginsL WHERE guid IN ({vars})"), params())?;
            scope.err_if_interrupted()?;
        }
        tx.commit()?;
        debug!(count = ids.len(), %server_modified, "marked records as synchronized");
        Ok(())
    }

    // ── Sync metadata ────────────────────────────────────────────

    /// The server time the last completed sync reached. Zero before the
    /// first sync.
    pub fn last_sync(&self) -> LoginsResult<ServerTimestamp> {
        Ok(ServerTimestamp::from_millis(
            self.get_meta::<i64>(LAST_SYNC_META_KEY)?.unwrap_or(0),
        ))
    }

    pub fn set_last_sync(&self, last_sync: ServerTimestamp) -> LoginsResult<()> {
        debug!(%last_sync, "updating last sync");
        self.put_meta(LAST_SYNC_META_KEY, &last_sync.as_millis())
    }

    /// The stored sync ids, if this store is bound to a collection.
    pub fn sync_ids(&self) -> LoginsResult<Option<SyncIds>> {
        let global = self.get_meta::<String>(GLOBAL_SYNCID_META_KEY)?;
        let collection = self.get_meta::<String>(COLLECTION_SYNCID_META_KEY)?;
        Ok(match (global, collection) {
            (Some(global), Some(collection)) => Some(SyncIds { global, collection }),
            _ => None,
        })
    }

    /// Forgets everything sync knows: the mirror becomes local data waiting
    /// to be uploaded, the checkpoint goes back to zero and the sync ids are
    /// replaced or cleared. Login data itself is kept.
    pub fn reset(&self, assoc: &SyncAssociation) -> LoginsResult<()> {
        info!("resetting login sync state");
        let tx = self.conn.unchecked_transaction()?;
        self.conn.execute(&CLONE_ENTIRE_MIRROR_SQL, [])?;
        self.conn.execute("DELETE FROM loginsM", [])?;
        self.conn.execute(
            &format!("UPDATE loginsL SET sync_status = {}", SyncStatus::New as u8),
            [],
        )?;
        self.set_last_sync(ServerTimestamp(0))?;
        match assoc {
            SyncAssociation::Disconnected => {
                self.delete_meta(GLOBAL_SYNCID_META_KEY)?;
                self.delete_meta(COLLECTION_SYNCID_META_KEY)?;
            }
            SyncAssociation::Connected(ids) => {
                self.put_meta(GLOBAL_SYNCID_META_KEY, &ids.global)?;
                self.put_meta(COLLECTION_SYNCID_META_KEY, &ids.collection)?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn local_row_from(
    row: &Row<'_>,
    encdec: &dyn EncryptorDecryptor,
) -> LoginsResult<RowState<LocalRow>> {
    let local_modified = row.get::<_, Option<i64>>("local_modified")?.unwrap_or(0);
    let enc = EncryptedLogin::from_row(row)?;
    if row.get::<_, bool>("is_deleted")? {
        return Ok(RowState::Present(LocalRow::Tombstone {
            id: enc.record.id,
            local_modified,
        }));
    }
    let sync_status = SyncStatus::from_u8(row.get("sync_status")?)?;
    Ok(match enc.decrypt(encdec) {
        Ok(login) => RowState::Present(LocalRow::Alive {
            login,
            local_modified,
            sync_status,
        }),
        Err(LoginsError::DecryptionFailed(_)) => RowState::Undecryptable,
        Err(e) => return Err(e),
    })
}

fn mirror_row_from(
    row: &Row<'_>,
    encdec: &dyn EncryptorDecryptor,
) -> LoginsResult<RowState<MirrorRow>> {
    let server_modified = ServerTimestamp::from_millis(row.get("server_modified")?);
    let is_overridden: bool = row.get("is_overridden")?;
    Ok(match EncryptedLogin::from_row(row)?.decrypt(encdec) {
        Ok(login) => RowState::Present(MirrorRow {
            login,
            server_modified,
            is_overridden,
        }),
        Err(LoginsError::DecryptionFailed(_)) => RowState::Undecryptable,
        Err(e) => return Err(e),
    })
}
