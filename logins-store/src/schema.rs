//! SQLite schema for the login store.
//!
//! Two tables hold logins: `loginsL` is the local overlay (unsynced edits
//! and tombstones) and `loginsM` is the mirror of what the server last
//! agreed on. `loginsSyncMeta` is a small key/value table for sync state and
//! the key canary.

use crate::error::LoginsResult;
use rusqlite::Connection;
use tracing::{debug, warn};

pub(crate) const VERSION: i64 = 2;

/// Columns shared by both login tables, in the order `EncryptedLogin::from_row`
/// reads them by name.
pub(crate) const COMMON_COLS: &str = "
    guid,
    secFields,
    origin,
    httpRealm,
    formActionOrigin,
    usernameField,
    passwordField,
    timeCreated,
    timeLastUsed,
    timePasswordChanged,
    timesUsed
";

pub(crate) const LAST_SYNC_META_KEY: &str = "last_sync_time";
pub(crate) const GLOBAL_SYNCID_META_KEY: &str = "global_sync_id";
pub(crate) const COLLECTION_SYNCID_META_KEY: &str = "passwords_sync_id";
pub(crate) const KEY_CANARY_META_KEY: &str = "key_canary";

const CREATE_TABLES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS loginsL (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        origin              TEXT NOT NULL,
        httpRealm           TEXT,
        formActionOrigin    TEXT,
        usernameField       TEXT,
        passwordField       TEXT,
        timesUsed           INTEGER NOT NULL DEFAULT 0,
        timeCreated         INTEGER NOT NULL,
        timeLastUsed        INTEGER,
        timePasswordChanged INTEGER NOT NULL,
        secFields           TEXT,
        guid                TEXT NOT NULL UNIQUE,

        local_modified      INTEGER,
        is_deleted          TINYINT NOT NULL DEFAULT 0,
        sync_status         TINYINT NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS loginsM (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        origin              TEXT NOT NULL,
        httpRealm           TEXT,
        formActionOrigin    TEXT,
        usernameField       TEXT,
        passwordField       TEXT,
        timesUsed           INTEGER NOT NULL DEFAULT 0,
        timeCreated         INTEGER NOT NULL,
        timeLastUsed        INTEGER,
        timePasswordChanged INTEGER NOT NULL,
        secFields           TEXT,
        guid                TEXT NOT NULL UNIQUE,

        server_modified     INTEGER NOT NULL,
        is_overridden       TINYINT NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS loginsSyncMeta (
        key   TEXT PRIMARY KEY,
        value NOT NULL
    );
";

const CREATE_INDEXES_SQL: &str = "
    CREATE INDEX IF NOT EXISTS idx_loginsM_is_overridden_origin
        ON loginsM (is_overridden, origin);
    CREATE INDEX IF NOT EXISTS idx_loginsL_is_deleted_origin
        ON loginsL (is_deleted, origin);
";

/// Creates or upgrades the schema on a freshly opened connection.
pub(crate) fn init(conn: &Connection) -> LoginsResult<()> {
    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version == 0 {
        return create(conn);
    }
    if user_version < VERSION {
        upgrade(conn, user_version)?;
    } else if user_version > VERSION {
        warn!(
            "opened future schema version {user_version} (we understand {VERSION}), continuing"
        );
    }
    Ok(())
}

fn create(conn: &Connection) -> LoginsResult<()> {
    debug!("creating logins schema v{VERSION}");
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(CREATE_TABLES_SQL)?;
    tx.execute_batch(CREATE_INDEXES_SQL)?;
    tx.pragma_update(None, "user_version", VERSION)?;
    tx.commit()?;
    Ok(())
}

fn upgrade(conn: &Connection, from: i64) -> LoginsResult<()> {
    debug!("upgrading logins schema from v{from} to v{VERSION}");
    let tx = conn.unchecked_transaction()?;
    for version in from..VERSION {
        // v1 stores predate the origin lookup indexes.
        if version == 1 {
            tx.execute_batch(CREATE_INDEXES_SQL)?;
        }
    }
    tx.pragma_update(None, "user_version", VERSION)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(conn: &Connection) -> i64 {
        conn.query_row("PRAGMA user_version", [], |row| row.get(0)).unwrap()
    }

    fn index_count(conn: &Connection) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_logins%'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn fresh_database_gets_current_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        assert_eq!(user_version(&conn), VERSION);
        assert_eq!(index_count(&conn), 2);
    }

    #[test]
    fn v1_database_gains_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CREATE_TABLES_SQL).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        assert_eq!(index_count(&conn), 0);

        init(&conn).unwrap();
        assert_eq!(user_version(&conn), VERSION);
        assert_eq!(index_count(&conn), 2);
    }

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
        assert_eq!(user_version(&conn), VERSION);
    }

    #[test]
    fn future_version_is_left_alone() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        conn.pragma_update(None, "user_version", VERSION + 1).unwrap();
        init(&conn).unwrap();
        assert_eq!(user_version(&conn), VERSION + 1);
    }
}
