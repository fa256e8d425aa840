//! The login database.
//!
//! Reads see the union of live local rows (`loginsL WHERE is_deleted = 0`)
//! and mirror rows nobody has overridden locally
//! (`loginsM WHERE is_overridden = 0`). Writes only ever touch `loginsL`;
//! the mirror is maintained by sync.

use crate::encrypted::{EncryptedLogin, SyncStatus};
use crate::error::{LoginsError, LoginsResult};
use crate::interrupt::{InterruptHandle, InterruptScope};
use crate::schema::{self, COMMON_COLS};
use logins_crypto::{EncryptorDecryptor, EncryptorDecryptorExt};
use logins_types::{
    Guid, Host, InvalidLogin, Login, LoginEntry, LoginFields, RecordFields, now_millis,
    origin_host,
};
use rusqlite::types::FromSql;
use rusqlite::{Connection, OptionalExtension, ToSql, named_params};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info, warn};

static GET_ALL_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {COMMON_COLS} FROM loginsL WHERE is_deleted = 0
         UNION ALL
         SELECT {COMMON_COLS} FROM loginsM WHERE is_overridden = 0"
    )
});

static GET_BY_GUID_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {COMMON_COLS} FROM loginsL
         WHERE is_deleted = 0 AND guid = :guid
         UNION ALL
         SELECT {COMMON_COLS} FROM loginsM
         WHERE is_overridden = 0 AND guid = :guid
         LIMIT 1"
    )
});

static GET_BY_FORM_ACTION_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {COMMON_COLS} FROM loginsL
         WHERE is_deleted = 0
           AND origin = :origin
           AND formActionOrigin = :form_action_origin
         UNION ALL
         SELECT {COMMON_COLS} FROM loginsM
         WHERE is_overridden = 0
           AND origin = :origin
           AND formActionOrigin = :form_action_origin"
    )
});

static GET_BY_HTTP_REALM_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {COMMON_COLS} FROM loginsL
         WHERE is_deleted = 0
           AND origin = :origin
           AND httpRealm = :http_realm
         UNION ALL
         SELECT {COMMON_COLS} FROM loginsM
         WHERE is_overridden = 0
           AND origin = :origin
           AND httpRealm = :http_realm"
    )
});

pub(crate) static CLONE_ENTIRE_MIRROR_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "INSERT OR IGNORE INTO loginsL ({COMMON_COLS}, local_modified, is_deleted, sync_status)
         SELECT {COMMON_COLS}, NULL, 0, {synced}
         FROM loginsM",
        synced = SyncStatus::Synced as u8
    )
});

/// Local rows the server has never seen: new since the last sync and with
/// no mirror counterpart. Deleting these needs no tombstone.
static DELETE_NEVER_SYNCED_SQL: LazyLock<String> = LazyLock::new(|| {
    format!(
        "DELETE FROM loginsL
         WHERE sync_status = {new}
           AND NOT EXISTS (SELECT 1 FROM loginsM WHERE loginsM.guid = loginsL.guid)",
        new = SyncStatus::New as u8
    )
});

pub(crate) static CLONE_SINGLE_MIRROR_SQL: LazyLock<String> =
    LazyLock::new(|| format!("{} WHERE guid = :guid", &*CLONE_ENTIRE_MIRROR_SQL));

/// Per-record outcome counts of [`LoginDb::import_multiple`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportMetrics {
    pub num_processed: usize,
    pub num_succeeded: usize,
    pub num_failed: usize,
    /// One message per failed record. Never contains login contents.
    pub errors: Vec<String>,
}

/// A SQLite connection holding the login tables.
pub struct LoginDb {
    pub(crate) conn: Connection,
    interrupt: Arc<InterruptHandle>,
}

impl LoginDb {
    /// Opens (or creates) a login database at `path`.
    pub fn open(path: impl AsRef<Path>) -> LoginsResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> LoginsResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Wraps an already open connection, creating or upgrading the schema.
    pub fn with_connection(conn: Connection) -> LoginsResult<Self> {
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        schema::init(&conn)?;
        let interrupt = Arc::new(InterruptHandle::new(conn.get_interrupt_handle()));
        Ok(Self { conn, interrupt })
    }

    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        Arc::clone(&self.interrupt)
    }

    #[must_use]
    pub fn begin_interrupt_scope(&self) -> InterruptScope {
        self.interrupt.begin_scope()
    }

    // ── Meta ─────────────────────────────────────────────────────

    pub(crate) fn put_meta(&self, key: &str, value: &dyn ToSql) -> LoginsResult<()> {
        self.conn.execute(
            "REPLACE INTO loginsSyncMeta (key, value) VALUES (:key, :value)",
            named_params! { ":key": key, ":value": value },
        )?;
        Ok(())
    }

    pub(crate) fn get_meta<T: FromSql>(&self, key: &str) -> LoginsResult<Option<T>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM loginsSyncMeta WHERE key = :key",
                named_params! { ":key": key },
                |row| row.get(0),
            )
            .optional()?)
    }

    pub(crate) fn delete_meta(&self, key: &str) -> LoginsResult<()> {
        self.conn.execute(
            "DELETE FROM loginsSyncMeta WHERE key = :key",
            named_params! { ":key": key },
        )?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn get_all(&self) -> LoginsResult<Vec<EncryptedLogin>> {
        let mut stmt = self.conn.prepare_cached(&GET_ALL_SQL)?;
        let rows = stmt.query_and_then([], EncryptedLogin::from_row)?;
        rows.collect()
    }

    pub fn get_by_id(&self, id: &str) -> LoginsResult<Option<EncryptedLogin>> {
        let mut stmt = self.conn.prepare_cached(&GET_BY_GUID_SQL)?;
        let mut rows = stmt.query_and_then(named_params! { ":guid": id }, EncryptedLogin::from_row)?;
        rows.next().transpose()
    }

    /// Logins whose origin host is `base_domain` or a subdomain of it. IP
    /// addresses only match exactly.
    pub fn get_by_base_domain(&self, base_domain: &str) -> LoginsResult<Vec<EncryptedLogin>> {
        // The input is PII, don't log it.
        let Some(base) = Host::parse(base_domain) else {
            warn!("get_by_base_domain was passed an invalid domain");
            return Ok(Vec::new());
        };
        // Linear scan; record counts are small.
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|login| origin_host(&login.fields.origin).is_some_and(|host| host.is_within(&base)))
            .collect())
    }

    /// Live logins with the same origin and the same form action origin or
    /// http realm as `fields`.
    fn get_by_target(&self, fields: &LoginFields) -> LoginsResult<Vec<EncryptedLogin>> {
        match (&fields.form_action_origin, &fields.http_realm) {
            (Some(form_action_origin), None) => {
                let mut stmt = self.conn.prepare_cached(&GET_BY_FORM_ACTION_SQL)?;
                let rows = stmt.query_and_then(
                    named_params! {
                        ":origin": &fields.origin,
                        ":form_action_origin": form_action_origin,
                    },
                    EncryptedLogin::from_row,
                )?;
                rows.collect()
            }
            (None, Some(http_realm)) => {
                let mut stmt = self.conn.prepare_cached(&GET_BY_HTTP_REALM_SQL)?;
                let rows = stmt.query_and_then(
                    named_params! {
                        ":origin": &fields.origin,
                        ":http_realm": http_realm,
                    },
                    EncryptedLogin::from_row,
                )?;
                rows.collect()
            }
            (Some(_), Some(_)) => Err(InvalidLogin::BothTargets.into()),
            (None, None) => Err(InvalidLogin::NoTarget.into()),
        }
    }

    /// Finds the saved login an upsert of `look` should update: one with the
    /// same target and username, or failing that one with the same target
    /// and a blank username.
    pub fn find_login_to_update(
        &self,
        look: LoginEntry,
        encdec: &dyn EncryptorDecryptor,
    ) -> LoginsResult<Option<Login>> {
        let look = look.fixup()?;
        let logins = self
            .get_by_target(&look.fields)?
            .into_iter()
            .map(|login| login.decrypt(encdec))
            .collect::<LoginsResult<Vec<Login>>>()?;
        Ok(logins
            .iter()
            .find(|login| login.username() == look.sec_fields.username)
            .or_else(|| logins.iter().find(|login| login.username().is_empty()))
            .cloned())
    }

    /// Logins sharing the target of `fields`, other than `id`, whatever their
    /// username.
    pub fn potential_dupes_ignoring_username(
        &self,
        id: &Guid,
        fields: &LoginFields,
    ) -> LoginsResult<Vec<EncryptedLogin>> {
        Ok(self
            .get_by_target(fields)?
            .into_iter()
            .filter(|login| login.guid() != id)
            .collect())
    }

    /// The id of a login other than `id` with the same target and username.
    pub fn find_dupe(
        &self,
        id: &Guid,
        entry: &LoginEntry,
        encdec: &dyn EncryptorDecryptor,
    ) -> LoginsResult<Option<Guid>> {
        for possible in self.potential_dupes_ignoring_username(id, &entry.fields)? {
            if possible.decrypt_fields(encdec)?.username == entry.sec_fields.username {
                return Ok(Some(possible.record.id));
            }
        }
        Ok(None)
    }

    /// Whether a live login with this id exists.
    pub fn exists(&self, id: &str) -> LoginsResult<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM loginsL WHERE guid = :guid AND is_deleted = 0
                 UNION ALL
                 SELECT 1 FROM loginsM WHERE guid = :guid AND is_overridden = 0
             )",
            named_params! { ":guid": id },
            |row| row.get(0),
        )?)
    }

    /// Whether any row, tombstones included, uses this id.
    fn id_in_use(&self, id: &str) -> LoginsResult<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM loginsL WHERE guid = :guid
                 UNION ALL
                 SELECT 1 FROM loginsM WHERE guid = :guid
             )",
            named_params! { ":guid": id },
            |row| row.get(0),
        )?)
    }

    /// Number of live logins.
    pub fn count(&self) -> LoginsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM loginsL WHERE is_deleted = 0)
                  + (SELECT COUNT(*) FROM loginsM WHERE is_overridden = 0)",
            [],
            |row| row.get(0),
        )?)
    }

    // ── Writes ───────────────────────────────────────────────────

    fn insert_new_login(&self, login: &EncryptedLogin) -> LoginsResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO loginsL (
                     origin, httpRealm, formActionOrigin, usernameField, passwordField,
                     timesUsed, secFields, guid, timeCreated, timeLastUsed,
                     timePasswordChanged, local_modified, is_deleted, sync_status
                 ) VALUES (
                     :origin, :http_realm, :form_action_origin, :username_field, :password_field,
                     :times_used, :sec_fields, :guid, :time_created, :time_last_used,
                     :time_password_changed, :local_modified, 0, {new}
                 )",
                new = SyncStatus::New as u8
            ),
            named_params! {
                ":origin": login.fields.origin,
                ":http_realm": login.fields.http_realm,
                ":form_action_origin": login.fields.form_action_origin,
                ":username_field": login.fields.username_field,
                ":password_field": login.fields.password_field,
                ":times_used": login.record.times_used,
                ":sec_fields": login.sec_fields,
                ":guid": login.guid().as_str(),
                ":time_created": login.record.time_created,
                ":time_last_used": login.record.time_last_used,
                ":time_password_changed": login.record.time_password_changed,
                ":local_modified": login.record.time_created,
            },
        )?;
        Ok(())
    }

    /// Rewrites every column of an existing local row. The local overlay must
    /// already exist.
    fn update_existing_login(&self, login: &EncryptedLogin, now: i64) -> LoginsResult<()> {
        self.conn.execute(
            &format!(
                "UPDATE loginsL
                 SET local_modified      = :now,
                     timeLastUsed        = :time_last_used,
                     timePasswordChanged = :time_password_changed,
                     httpRealm           = :http_realm,
                     formActionOrigin    = :form_action_origin,
                     usernameField       = :username_field,
                     passwordField       = :password_field,
                     timesUsed           = :times_used,
                     secFields           = :sec_fields,
                     origin              = :origin,
                     sync_status         = max(sync_status, {changed})
                 WHERE guid = :guid",
                changed = SyncStatus::Changed as u8
            ),
            named_params! {
                ":now": now,
                ":time_last_used": login.record.time_last_used,
                ":time_password_changed": login.record.time_password_changed,
                ":http_realm": login.fields.http_realm,
                ":form_action_origin": login.fields.form_action_origin,
                ":username_field": login.fields.username_field,
                ":password_field": login.fields.password_field,
                ":times_used": login.record.times_used,
                ":sec_fields": login.sec_fields,
                ":origin": login.fields.origin,
                ":guid": login.guid().as_str(),
            },
        )?;
        Ok(())
    }

    /// Adds a new login. Usage metadata is set by the store, never taken from
    /// the caller.
    pub fn add(
        &self,
        entry: LoginEntry,
        encdec: &dyn EncryptorDecryptor,
    ) -> LoginsResult<EncryptedLogin> {
        let entry = prepare_entry(entry)?;
        let tx = self.conn.unchecked_transaction()?;
        let guid = match &entry.id {
            Some(id) if !id.is_empty() => {
                if !id.is_valid_for_sync_server() {
                    return Err(InvalidLogin::IllegalFieldValue {
                        field_info: "`id` is not a valid record id".into(),
                    }
                    .into());
                }
                if self.id_in_use(id.as_str())? {
                    return Err(LoginsError::IdCollision(id.to_string()));
                }
                id.clone()
            }
            _ => Guid::random(),
        };
        if self.find_dupe(&guid, &entry, encdec)?.is_some() {
            return Err(InvalidLogin::DuplicateLogin.into());
        }
        let now = now_millis();
        let login = EncryptedLogin {
            record: RecordFields {
                id: guid,
                times_used: 0,
                time_created: now,
                time_last_used: now,
                time_password_changed: now,
            },
            fields: entry.fields,
            sec_fields: encdec.encrypt_struct(&entry.sec_fields)?,
        };
        self.insert_new_login(&login)?;
        tx.commit()?;
        debug!(id = %login.guid(), "added login");
        Ok(login)
    }

    /// Replaces the fields of an existing login.
    pub fn update(
        &self,
        id: &str,
        entry: LoginEntry,
        encdec: &dyn EncryptorDecryptor,
    ) -> LoginsResult<EncryptedLogin> {
        let entry = prepare_entry(entry)?;
        let guid = Guid::new(id);
        let now = now_millis();
        let tx = self.conn.unchecked_transaction()?;

        // A dupe here means the caller's upsert logic went wrong. The update
        // still goes ahead.
        if self.find_dupe(&guid, &entry, encdec)?.is_some() {
            let has_mirror_row: bool =
                self.conn
                    .query_row("SELECT EXISTS (SELECT 1 FROM loginsM)", [], |row| row.get(0))?;
            error!(has_mirror_row, "duplicate login in update");
        }

        let existing = self
            .get_by_id(id)?
            .ok_or_else(|| LoginsError::NoSuchRecord(id.to_owned()))?;
        self.ensure_local_overlay_exists(id)?;
        self.mark_mirror_overridden(id)?;

        let time_password_changed =
            if existing.decrypt_fields(encdec)?.password == entry.sec_fields.password {
                existing.record.time_password_changed
            } else {
                now
            };
        let result = EncryptedLogin {
            record: RecordFields {
                id: existing.record.id,
                times_used: existing.record.times_used + 1,
                time_created: existing.record.time_created,
                time_last_used: now,
                time_password_changed,
            },
            fields: entry.fields,
            sec_fields: encdec.encrypt_struct(&entry.sec_fields)?,
        };
        self.update_existing_login(&result, now)?;
        tx.commit()?;
        debug!(id, "updated login");
        Ok(result)
    }

    /// Updates the login [`find_login_to_update`](Self::find_login_to_update)
    /// picks, or adds a new one.
    pub fn add_or_update(
        &self,
        entry: LoginEntry,
        encdec: &dyn EncryptorDecryptor,
    ) -> LoginsResult<EncryptedLogin> {
        let entry = prepare_entry(entry)?;
        match self.find_login_to_update(entry.clone(), encdec)? {
            Some(login) => self.update(login.id(), entry, encdec),
            None => self.add(entry, encdec),
        }
    }

    /// Records a use of the login. Does not mark it as changed for sync.
    pub fn touch(&self, id: &str) -> LoginsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        if !self.exists(id)? {
            return Err(LoginsError::NoSuchRecord(id.to_owned()));
        }
        self.ensure_local_overlay_exists(id)?;
        self.mark_mirror_overridden(id)?;
        self.conn.execute(
            "UPDATE loginsL
             SET timeLastUsed   = :now,
                 timesUsed      = timesUsed + 1,
                 local_modified = :now
             WHERE guid = :guid AND is_deleted = 0",
            named_params! { ":now": now_millis(), ":guid": id },
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Deletes a login, leaving a tombstone for sync if the server has seen
    /// it. Returns whether the login existed.
    pub fn delete(&self, id: &str) -> LoginsResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let exists = self.exists(id)?;
        let now = now_millis();

        self.conn.execute(
            &format!("{} AND guid = :guid", &*DELETE_NEVER_SYNCED_SQL),
            named_params! { ":guid": id },
        )?;
        self.conn.execute(
            &format!(
                "UPDATE loginsL
                 SET local_modified   = :now,
                     sync_status      = {changed},
                     is_deleted       = 1,
                     secFields        = '',
                     origin           = '',
                     httpRealm        = NULL,
                     formActionOrigin = NULL
                 WHERE guid = :guid",
                changed = SyncStatus::Changed as u8
            ),
            named_params! { ":now": now, ":guid": id },
        )?;
        self.mark_mirror_overridden(id)?;
        // Mirror-only logins need a tombstone of their own.
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO loginsL
                     (guid, local_modified, is_deleted, sync_status, origin,
                      timeCreated, timePasswordChanged, secFields)
                 SELECT guid, :now, 1, {changed}, '', timeCreated, :now, ''
                 FROM loginsM
                 WHERE guid = :guid",
                changed = SyncStatus::Changed as u8
            ),
            named_params! { ":now": now, ":guid": id },
        )?;
        tx.commit()?;
        Ok(exists)
    }

    pub(crate) fn mark_mirror_overridden(&self, guid: &str) -> LoginsResult<()> {
        self.conn.execute(
            "UPDATE loginsM SET is_overridden = 1 WHERE guid = :guid",
            named_params! { ":guid": guid },
        )?;
        Ok(())
    }

    /// Makes sure `loginsL` has a row for `guid`, cloning it from the mirror
    /// when needed.
    pub(crate) fn ensure_local_overlay_exists(&self, guid: &str) -> LoginsResult<()> {
        let already_have_local: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM loginsL WHERE guid = :guid)",
            named_params! { ":guid": guid },
            |row| row.get(0),
        )?;
        if already_have_local {
            return Ok(());
        }
        debug!(guid, "no overlay, cloning one");
        let changed = self
            .conn
            .execute(&CLONE_SINGLE_MIRROR_SQL, named_params! { ":guid": guid })?;
        if changed == 0 {
            error!(guid, "failed to create local overlay");
            return Err(LoginsError::NoSuchRecord(guid.to_owned()));
        }
        Ok(())
    }

    /// Deletes every login, leaving tombstones so the deletions of synced
    /// logins reach the server.
    pub fn wipe(&self, scope: &InterruptScope) -> LoginsResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        info!("wiping all logins");
        let now = now_millis();
        scope.err_if_interrupted()?;
        self.conn.execute(&DELETE_NEVER_SYNCED_SQL, [])?;
        scope.err_if_interrupted()?;
        self.conn.execute(
            &format!(
                "UPDATE loginsL
                 SET local_modified   = :now,
                     sync_status      = {changed},
                     is_deleted       = 1,
                     secFields        = '',
                     origin           = '',
                     httpRealm        = NULL,
                     formActionOrigin = NULL
                 WHERE is_deleted = 0",
                changed = SyncStatus::Changed as u8
            ),
            named_params! { ":now": now },
        )?;
        scope.err_if_interrupted()?;
        self.conn.execute("UPDATE loginsM SET is_overridden = 1", [])?;
        scope.err_if_interrupted()?;
        self.conn.execute(
            &format!(
                "INSERT OR IGNORE INTO loginsL
                     (guid, local_modified, is_deleted, sync_status, origin,
                      timeCreated, timePasswordChanged, secFields)
                 SELECT guid, :now, 1, {changed}, '', timeCreated, :now, ''
                 FROM loginsM",
                changed = SyncStatus::Changed as u8
            ),
            named_params! { ":now": now },
        )?;
        scope.err_if_interrupted()?;
        tx.commit()?;
        Ok(())
    }

    /// Drops all local and mirror state without leaving tombstones, as if
    /// this device had never synced. The key canary survives.
    pub fn wipe_local(&self) -> LoginsResult<()> {
        info!("wiping local login state");
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM loginsL", [])?;
        tx.execute("DELETE FROM loginsM", [])?;
        tx.execute(
            "DELETE FROM loginsSyncMeta WHERE key != :canary",
            named_params! { ":canary": schema::KEY_CANARY_META_KEY },
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Bulk-inserts logins from another store, keeping their metadata.
    /// Records that are invalid or duplicate earlier ones are skipped.
    pub fn import_multiple(
        &self,
        logins: Vec<Login>,
        encdec: &dyn EncryptorDecryptor,
    ) -> LoginsResult<ImportMetrics> {
        let mut metrics = ImportMetrics::default();
        let tx = self.conn.unchecked_transaction()?;
        let now = now_millis();
        for login in logins {
            metrics.num_processed += 1;
            let old_guid = login.guid().clone();
            match self.import_one(login, encdec, now) {
                Ok(new_guid) => {
                    metrics.num_succeeded += 1;
                    debug!(%old_guid, %new_guid, "imported login");
                }
                Err(e @ (LoginsError::InvalidRecord(_) | LoginsError::DecryptionFailed(_))) => {
                    warn!(%old_guid, "skipping login: {e}");
                    metrics.num_failed += 1;
                    metrics.errors.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        tx.commit()?;
        info!(
            processed = metrics.num_processed,
            succeeded = metrics.num_succeeded,
            failed = metrics.num_failed,
            "import finished"
        );
        Ok(metrics)
    }

    fn import_one(
        &self,
        login: Login,
        encdec: &dyn EncryptorDecryptor,
        now: i64,
    ) -> LoginsResult<Guid> {
        let entry = login.entry().fixup()?;
        let id = if login.record.id.is_valid_for_sync_server()
            && !self.id_in_use(login.record.id.as_str())?
        {
            login.record.id.clone()
        } else {
            Guid::random()
        };
        if self.find_dupe(&id, &entry, encdec)?.is_some() {
            return Err(InvalidLogin::DuplicateLogin.into());
        }
        let record = &login.record;
        let time_created = if record.time_created > 0 { record.time_created } else { now };
        let or_created = |t: i64| if t > 0 { t } else { time_created };
        let encrypted = EncryptedLogin {
            record: RecordFields {
                id: id.clone(),
                times_used: record.times_used.max(0),
                time_created,
                time_last_used: or_created(record.time_last_used),
                time_password_changed: or_created(record.time_password_changed),
            },
            fields: entry.fields,
            sec_fields: encdec.encrypt_struct(&entry.sec_fields)?,
        };
        self.insert_new_login(&encrypted)?;
        Ok(id)
    }
}

/// Validates and normalizes caller input. Having both targets is an error
/// here, even though sync and import repair it.
fn prepare_entry(entry: LoginEntry) -> LoginsResult<LoginEntry> {
    if entry.fields.form_action_origin.is_some() && entry.fields.http_realm.is_some() {
        return Err(InvalidLogin::BothTargets.into());
    }
    Ok(entry.fixup()?)
}

/// `?,?,?` with `n` placeholders.
pub(crate) fn repeat_sql_vars(n: usize) -> String {
    vec!["?"; n].join(",")
}
