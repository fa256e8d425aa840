mod common;

use common::{form_entry, init_tracing, new_key, unlocked_store};
use logins_store::{LoginStore, LoginsError, SyncStatus};
use logins_types::Guid;
use std::panic::{AssertUnwindSafe, catch_unwind};

fn locked_store() -> LoginStore {
    init_tracing();
    LoginStore::open_in_memory().unwrap()
}

// ── Lock state machine ───────────────────────────────────────────

#[test]
fn store_starts_locked() {
    let store = locked_store();
    assert!(store.is_locked().unwrap());
}

#[test]
fn unlock_then_lock() {
    let store = locked_store();
    let key = new_key();
    store.unlock(&key).unwrap();
    assert!(!store.is_locked().unwrap());
    store.lock().unwrap();
    assert!(store.is_locked().unwrap());
    store.unlock(&key).unwrap();
    assert!(!store.is_locked().unwrap());
}

#[test]
fn double_unlock_is_mismatched() {
    let (store, key) = unlocked_store();
    assert!(matches!(store.unlock(&key).unwrap_err(), LoginsError::MismatchedLock));
    assert!(!store.is_locked().unwrap());
}

#[test]
fn double_lock_is_mismatched() {
    let store = locked_store();
    assert!(matches!(store.lock().unwrap_err(), LoginsError::MismatchedLock));
}

#[test]
fn ensure_variants_are_idempotent() {
    let store = locked_store();
    let key = new_key();
    store.ensure_locked().unwrap();
    store.ensure_unlocked(&key).unwrap();
    store.ensure_unlocked(&key).unwrap();
    assert!(!store.is_locked().unwrap());
    store.ensure_locked().unwrap();
    store.ensure_locked().unwrap();
    assert!(store.is_locked().unwrap());
}

#[test]
fn close_locks() {
    let (store, _) = unlocked_store();
    store.close().unwrap();
    assert!(store.is_locked().unwrap());
    store.close().unwrap();
}

#[test]
fn unlock_rejects_malformed_key() {
    let store = locked_store();
    assert!(matches!(store.unlock("not a key").unwrap_err(), LoginsError::InvalidKey));
    assert!(matches!(store.unlock("").unwrap_err(), LoginsError::InvalidKey));
    assert!(store.is_locked().unwrap());
}

#[test]
fn unlock_rejects_other_key() {
    let (store, _) = unlocked_store();
    store.add(form_entry("https://example.com", "alice", "pw")).unwrap();
    store.lock().unwrap();
    assert!(matches!(store.unlock(&new_key()).unwrap_err(), LoginsError::InvalidKey));
    assert!(store.is_locked().unwrap());
    assert!(!store.is_poisoned());
}

#[test]
fn record_operations_fail_while_locked() {
    let store = locked_store();
    assert!(matches!(store.list().unwrap_err(), LoginsError::Locked));
    assert!(matches!(store.get("x").unwrap_err(), LoginsError::Locked));
    assert!(matches!(store.count().unwrap_err(), LoginsError::Locked));
    assert!(matches!(
        store.add(form_entry("https://example.com", "alice", "pw")).unwrap_err(),
        LoginsError::Locked
    ));
    assert!(matches!(store.delete("x").unwrap_err(), LoginsError::Locked));
    assert!(matches!(store.wipe_local().unwrap_err(), LoginsError::Locked));
    assert!(!store.is_poisoned());
}

// ── Poisoning ────────────────────────────────────────────────────

#[test]
fn panic_while_held_poisons_the_handle() {
    let (store, key) = unlocked_store();
    let result = catch_unwind(AssertUnwindSafe(|| {
        store
            .with_unlocked(|_, _| -> logins_store::LoginsResult<()> { panic!("boom") })
            .ok();
    }));
    assert!(result.is_err());

    assert!(matches!(store.list().unwrap_err(), LoginsError::Poisoned));
    assert!(store.is_poisoned());
    assert!(matches!(store.is_locked().unwrap_err(), LoginsError::Poisoned));
    assert!(matches!(store.unlock(&key).unwrap_err(), LoginsError::Poisoned));
}

#[test]
fn record_errors_do_not_poison() {
    let (store, _) = unlocked_store();
    store.update("missing", form_entry("https://a.com", "a", "pw")).unwrap_err();
    store.add(form_entry("", "a", "pw")).unwrap_err();
    assert!(!store.is_poisoned());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn corrupt_row_poisons_the_handle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logins.db");
    let store = LoginStore::open(&path).unwrap();
    store.unlock(&new_key()).unwrap();
    let login = store.add(form_entry("https://example.com", "alice", "pw")).unwrap();

    let raw = rusqlite::Connection::open(&path).unwrap();
    raw.execute("UPDATE loginsL SET sync_status = 9", []).unwrap();

    let id = Guid::new(login.id());
    let err = store
        .with_unlocked(|db, encdec| db.fetch_sync_rows(&id, encdec))
        .unwrap_err();
    assert!(matches!(err, LoginsError::Corrupt(_)));
    assert!(store.is_poisoned());
    assert!(matches!(store.list().unwrap_err(), LoginsError::Poisoned));
}

#[test]
fn sync_status_values_are_stable() {
    assert_eq!(SyncStatus::Synced as u8, 0);
    assert_eq!(SyncStatus::Changed as u8, 1);
    assert_eq!(SyncStatus::New as u8, 2);
    assert!(SyncStatus::New > SyncStatus::Changed);
}
