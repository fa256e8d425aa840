mod common;

use common::{
    ORIGIN, engine, envelope, form_entry, raw_envelope, remote_login, tombstone_envelope,
    unlocked_store,
};
use logins_store::LoginStore;
use logins_store::sync::SyncIds;
use logins_sync::{
    EngineIncoming, IncomingSummary, LoginsSyncEngine, SyncError, TieBreak,
};
use logins_types::{Guid, LoginEntry, ServerTimestamp, StoreEvent, now_millis};
use pretty_assertions::assert_eq;
use std::sync::Arc;

const HOUR: i64 = 3_600_000;

fn apply(
    engine: &LoginsSyncEngine,
    envelopes: Vec<logins_sync::IncomingEnvelope>,
) -> IncomingSummary {
    let scope = engine.store().begin_interrupt_scope();
    engine
        .apply_incoming(envelopes, ServerTimestamp(now_millis()), &scope)
        .unwrap()
}

fn outgoing_ids(engine: &LoginsSyncEngine) -> Vec<(Guid, bool)> {
    let scope = engine.store().begin_interrupt_scope();
    let mut ids: Vec<_> = engine
        .fetch_outgoing(&scope)
        .unwrap()
        .records
        .into_iter()
        .map(|r| {
            let tombstone = r.is_tombstone();
            (r.id, tombstone)
        })
        .collect();
    ids.sort();
    ids
}

/// Seeds the mirror with `remote` as if it came from an earlier sync.
fn seed_mirror(engine: &LoginsSyncEngine, remote: logins_types::Login) {
    let summary = apply(engine, vec![envelope(remote, now_millis() - HOUR)]);
    assert_eq!(summary.incoming.applied, 1);
}

// ── New records ──────────────────────────────────────────────────

#[test]
fn unknown_record_is_applied() {
    let store = unlocked_store();
    let engine = engine(&store);
    let summary = apply(&engine, vec![envelope(remote_login("r1", "alice", "pw", 1_000), 5)]);
    assert_eq!(
        summary.incoming,
        EngineIncoming {
            applied: 1,
            failed: 0,
            reconciled: 0,
        }
    );

    let login = store.get("r1").unwrap().unwrap();
    assert_eq!(login.username(), "alice");
    assert_eq!(login.password(), "pw");
    assert_eq!(login.record.times_used, 3);
    // Applied records are already in sync.
    assert!(outgoing_ids(&engine).is_empty());

    let events: Vec<_> = store.take_events().into_iter().map(|e| e.event).collect();
    assert_eq!(events, vec![StoreEvent::Applied { id: Guid::new("r1") }]);
}

#[test]
fn mirror_only_record_fast_forwards() {
    let store = unlocked_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "old", 1_000));

    let summary = apply(&engine, vec![envelope(remote_login("r1", "alice", "new", 2_000), now_millis())]);
    assert_eq!(summary.incoming.applied, 1);
    assert_eq!(store.get("r1").unwrap().unwrap().password(), "new");
    assert!(outgoing_ids(&engine).is_empty());
}

// ── Three-way merge ──────────────────────────────────────────────

#[test]
fn local_change_wins_over_unchanged_remote() {
    let store = unlocked_store();
    let engine = engine(&store);
    let remote = remote_login("r1", "alice", "a", 1_000);
    seed_mirror(&engine, remote.clone());
    store.update("r1", form_entry("alice", "b")).unwrap();

    let summary = apply(&engine, vec![envelope(remote, now_millis())]);
    assert_eq!(summary.incoming.reconciled, 1);
    assert_eq!(store.get("r1").unwrap().unwrap().password(), "b");
    assert_eq!(outgoing_ids(&engine), vec![(Guid::new("r1"), false)]);
}

#[test]
fn remote_change_wins_over_unchanged_local() {
    let store = unlocked_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "a", 1_000));
    // Only usage changes locally.
    store.touch("r1").unwrap();

    let summary = apply(&engine, vec![envelope(remote_login("r1", "alice", "c", 2_000), now_millis())]);
    assert_eq!(summary.incoming.reconciled, 1);
    let merged = store.get("r1").unwrap().unwrap();
    assert_eq!(merged.password(), "c");
    assert_eq!(merged.record.time_password_changed, 2_000);
    // Local usage survives: 3 on the server plus one local use.
    assert_eq!(merged.record.times_used, 4);
}

#[test]
fn conflicting_passwords_newer_change_wins() {
    let store = unlocked_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "a", 1_000));
    store.update("r1", form_entry("alice", "b")).unwrap();

    // Remote changed the password before the local edit.
    apply(&engine, vec![envelope(remote_login("r1", "alice", "c", 2_000), now_millis())]);
    assert_eq!(store.get("r1").unwrap().unwrap().password(), "b");
}

#[test]
fn conflicting_passwords_newer_remote_wins() {
    let store = unlocked_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "a", 1_000));
    store.update("r1", form_entry("alice", "b")).unwrap();

    let later = now_millis() + HOUR;
    apply(&engine, vec![envelope(remote_login("r1", "alice", "c", later), now_millis())]);
    let merged = store.get("r1").unwrap().unwrap();
    assert_eq!(merged.password(), "c");
    assert_eq!(merged.record.time_password_changed, later);
}

#[test]
fn tie_break_decides_equal_password_times() {
    for (tie_break, expected) in [(TieBreak::PreferRemote, "c"), (TieBreak::PreferLocal, "b")] {
        let store = unlocked_store();
        let engine = LoginsSyncEngine::new(Arc::clone(&store), tie_break);
        seed_mirror(&engine, remote_login("r1", "alice", "a", 1_000));
        let local = store.update("r1", form_entry("alice", "b")).unwrap();

        let remote = remote_login("r1", "alice", "c", local.record.time_password_changed);
        apply(&engine, vec![envelope(remote, now_millis())]);
        assert_eq!(store.get("r1").unwrap().unwrap().password(), expected, "{tie_break:?}");
    }
}

// ── Two-way merge ────────────────────────────────────────────────

#[test]
fn local_only_record_keeps_newer_password() {
    let store = unlocked_store();
    let engine = engine(&store);
    let local = store
        .add(form_entry("alice", "local").with_id("shared-id"))
        .unwrap();

    let summary = apply(
        &engine,
        vec![envelope(remote_login("shared-id", "alice", "remote", 1_000), now_millis())],
    );
    assert_eq!(summary.incoming.reconciled, 1);
    assert_eq!(store.get(local.id()).unwrap().unwrap().password(), "local");
    assert_eq!(outgoing_ids(&engine), vec![(Guid::new("shared-id"), false)]);
}

#[test]
fn local_only_record_takes_newer_remote() {
    let store = unlocked_store();
    let engine = engine(&store);
    store
        .add(form_entry("alice", "local").with_id("shared-id"))
        .unwrap();

    let later = now_millis() + HOUR;
    apply(
        &engine,
        vec![envelope(remote_login("shared-id", "alice", "remote", later), now_millis())],
    );
    assert_eq!(store.get("shared-id").unwrap().unwrap().password(), "remote");
    assert!(outgoing_ids(&engine).is_empty());
}

// ── Deletions ────────────────────────────────────────────────────

#[test]
fn incoming_tombstone_deletes_everywhere() {
    let store = unlocked_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "pw", 1_000));
    store.touch("r1").unwrap();

    let summary = apply(&engine, vec![tombstone_envelope("r1", now_millis())]);
    assert_eq!(summary.incoming.applied, 1);
    assert!(store.get("r1").unwrap().is_none());
    assert!(outgoing_ids(&engine).is_empty());
}

#[test]
fn recent_local_delete_beats_older_remote_change() {
    let store = unlocked_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "a", 1_000));
    assert!(store.delete("r1").unwrap());

    let summary = apply(
        &engine,
        vec![envelope(remote_login("r1", "alice", "c", 2_000), now_millis() - HOUR / 2)],
    );
    assert_eq!(summary.incoming.reconciled, 1);
    assert!(store.get("r1").unwrap().is_none());
    assert_eq!(outgoing_ids(&engine), vec![(Guid::new("r1"), true)]);
}

#[test]
fn newer_remote_change_resurrects_local_delete() {
    let store = unlocked_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "a", 1_000));
    assert!(store.delete("r1").unwrap());

    let scope = store.begin_interrupt_scope();
    // Server clock an hour ahead: the remote change is younger than the
    // local delete.
    let server_now = now_millis() + HOUR;
    engine
        .apply_incoming(
            vec![envelope(remote_login("r1", "alice", "c", 2_000), server_now)],
            ServerTimestamp(server_now),
            &scope,
        )
        .unwrap();
    assert_eq!(store.get("r1").unwrap().unwrap().password(), "c");
    assert!(outgoing_ids(&engine).is_empty());
}

// ── De-duplication ───────────────────────────────────────────────

#[test]
fn newer_duplicate_updates_existing_record() {
    let store = unlocked_store();
    let engine = engine(&store);
    let existing = store.add(form_entry("y", "old")).unwrap();

    let later = now_millis() + HOUR;
    let summary = apply(
        &engine,
        vec![envelope(remote_login("incoming", "x", "new", later), now_millis())],
    );
    assert_eq!(summary.incoming.reconciled, 1);

    let logins = store.list().unwrap();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].id(), existing.id());
    assert_eq!(logins[0].username(), "y");
    assert_eq!(logins[0].password(), "new");
    assert_eq!(logins[0].record.time_password_changed, later);

    // The duplicate id is deleted upstream.
    let outgoing = outgoing_ids(&engine);
    assert!(outgoing.contains(&(Guid::new("incoming"), true)));
    assert!(outgoing.contains(&(existing.guid().clone(), false)));
}

#[test]
fn older_duplicate_is_discarded() {
    let store = unlocked_store();
    let engine = engine(&store);
    let existing = store.add(form_entry("y", "old")).unwrap();

    let summary = apply(
        &engine,
        vec![envelope(remote_login("incoming", "x", "new", 1_000), now_millis())],
    );
    assert_eq!(summary.incoming.reconciled, 1);

    let logins = store.list().unwrap();
    assert_eq!(logins, vec![existing]);
    assert_eq!(
        outgoing_ids(&engine),
        {
            let mut expected = vec![
                (logins[0].guid().clone(), false),
                (Guid::new("incoming"), true),
            ];
            expected.sort();
            expected
        }
    );
}

#[test]
fn same_username_duplicate_takes_newer_remote_id() {
    let store = unlocked_store();
    let engine = engine(&store);
    let existing = store.add(form_entry("alice", "old")).unwrap();

    let later = now_millis() + HOUR;
    apply(
        &engine,
        vec![envelope(remote_login("incoming", "alice", "new", later), now_millis())],
    );

    let logins = store.list().unwrap();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].id(), "incoming");
    assert_eq!(logins[0].password(), "new");
    // The local copy was never uploaded, so nothing to delete upstream.
    assert!(store.get(existing.id()).unwrap().is_none());
    assert!(outgoing_ids(&engine).is_empty());
}

#[test]
fn different_site_is_not_a_duplicate() {
    let store = unlocked_store();
    let engine = engine(&store);
    store
        .add(LoginEntry::form("https://other.com", "https://other.com", "y", "pw"))
        .unwrap();

    let summary = apply(&engine, vec![envelope(remote_login("incoming", "x", "pw", 1_000), 5)]);
    assert_eq!(summary.incoming.applied, 1);
    assert_eq!(store.count().unwrap(), 2);
    assert_eq!(store.get("incoming").unwrap().unwrap().fields.origin, ORIGIN);
}

// ── Failures ─────────────────────────────────────────────────────

#[test]
fn malformed_records_are_counted_and_skipped() {
    let store = unlocked_store();
    let engine = engine(&store);
    let summary = apply(
        &engine,
        vec![
            raw_envelope("bad-json", 1, "{not json"),
            raw_envelope("wrong-id", 1, r#"{"id": "other", "hostname": "https://a.com", "formSubmitURL": "", "password": "pw"}"#),
            raw_envelope("no-password", 1, r#"{"id": "no-password", "hostname": "https://a.com", "formSubmitURL": "", "password": ""}"#),
            envelope(remote_login("good", "alice", "pw", 1_000), 1),
        ],
    );
    assert_eq!(
        summary.incoming,
        EngineIncoming {
            applied: 1,
            failed: 3,
            reconciled: 0,
        }
    );
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn interrupted_batch_stops_before_next_record() {
    let store = unlocked_store();
    let engine = engine(&store);
    let scope = store.begin_interrupt_scope();
    store.interrupt_handle().interrupt();

    let err = engine
        .apply_incoming(
            vec![envelope(remote_login("r1", "alice", "pw", 1_000), 5)],
            ServerTimestamp(now_millis()),
            &scope,
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::Interrupted));
    assert!(store.get("r1").unwrap().is_none());
}

#[test]
fn locked_store_fails_the_batch() {
    let store = unlocked_store();
    let engine = engine(&store);
    store.lock().unwrap();
    let scope = store.begin_interrupt_scope();
    let err = engine
        .apply_incoming(
            vec![envelope(remote_login("r1", "alice", "pw", 1_000), 5)],
            ServerTimestamp(now_millis()),
            &scope,
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::Store(logins_store::LoginsError::Locked)));
}

// ── Undecryptable rows ───────────────────────────────────────────

fn on_disk_store() -> (tempfile::TempDir, Arc<LoginStore>, rusqlite::Connection) {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logins.db");
    let store = LoginStore::open(&path).unwrap();
    store.unlock(&common::new_key()).unwrap();
    let raw = rusqlite::Connection::open(&path).unwrap();
    (dir, Arc::new(store), raw)
}

#[test]
fn undecryptable_mirror_row_is_dropped_and_counted() {
    let (_dir, store, raw) = on_disk_store();
    let engine = engine(&store);
    seed_mirror(&engine, remote_login("r1", "alice", "pw", 1_000));
    raw.execute("UPDATE loginsM SET secFields = 'garbage' WHERE guid = 'r1'", [])
        .unwrap();

    let summary = apply(&engine, vec![envelope(remote_login("r1", "alice", "new", 2_000), now_millis())]);
    assert_eq!(summary.mirror_deleted, 1);
    assert_eq!(summary.local_deleted, 0);
    assert_eq!(summary.incoming.applied, 1);
    assert_eq!(store.get("r1").unwrap().unwrap().password(), "new");
    assert!(!store.is_poisoned());

    let events: Vec<_> = store.take_events().into_iter().map(|e| e.event).collect();
    assert!(events.contains(&StoreEvent::Undecryptable {
        id: Guid::new("r1"),
        mirror: true,
    }));
}

#[test]
fn undecryptable_local_row_is_dropped_and_pass_continues() {
    let (_dir, store, raw) = on_disk_store();
    let engine = engine(&store);
    store.add(form_entry("alice", "pw").with_id("broken")).unwrap();
    raw.execute("UPDATE loginsL SET secFields = 'garbage' WHERE guid = 'broken'", [])
        .unwrap();
    let mut other = remote_login("other", "bob", "pw", 1_000);
    other.fields.origin = "https://other.com".into();
    other.fields.form_action_origin = Some("https://other.com".into());

    let summary = apply(
        &engine,
        vec![
            envelope(remote_login("broken", "alice", "server", 1_000), now_millis()),
            envelope(other, now_millis()),
        ],
    );
    assert_eq!(summary.local_deleted, 1);
    assert_eq!(summary.incoming.applied, 2);
    assert_eq!(store.get("broken").unwrap().unwrap().password(), "server");
    assert!(store.get("other").unwrap().is_some());
}

// ── Storage failures ─────────────────────────────────────────────

fn login_at(id: &str, origin: &str) -> logins_types::Login {
    let mut login = remote_login(id, "alice", "pw", 1_000);
    login.fields.origin = origin.into();
    login.fields.form_action_origin = Some(origin.into());
    login
}

#[test]
fn storage_error_aborts_the_rest_of_the_pass() {
    let (_dir, store, raw) = on_disk_store();
    let engine = engine(&store);
    raw.execute_batch(
        "CREATE TRIGGER refuse_r2 BEFORE INSERT ON loginsM WHEN NEW.guid = 'r2'
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    )
    .unwrap();

    let scope = store.begin_interrupt_scope();
    let err = engine
        .apply_incoming(
            vec![
                envelope(login_at("r1", "https://one.com"), 10),
                envelope(login_at("r2", "https://two.com"), 20),
                envelope(login_at("r3", "https://three.com"), 30),
            ],
            ServerTimestamp(now_millis()),
            &scope,
        )
        .unwrap_err();
    assert!(matches!(err, SyncError::Store(logins_store::LoginsError::Storage(_))));

    // Earlier records stay committed; the failing one and everything after
    // it are untouched.
    assert!(store.get("r1").unwrap().is_some());
    assert!(store.get("r2").unwrap().is_none());
    assert!(store.get("r3").unwrap().is_none());
    assert_eq!(engine.last_sync().unwrap(), ServerTimestamp(0));
    assert!(!store.is_poisoned());
}

// ── Outgoing and metadata ────────────────────────────────────────

#[test]
fn uploaded_records_leave_the_outgoing_set() {
    let store = unlocked_store();
    let engine = engine(&store);
    let login = store.add(form_entry("alice", "pw")).unwrap();

    let scope = store.begin_interrupt_scope();
    let outgoing = engine.fetch_outgoing(&scope).unwrap();
    assert_eq!(outgoing.records.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(&outgoing.records[0].payload).unwrap();
    assert_eq!(payload["hostname"], ORIGIN);
    assert_eq!(payload["username"], "alice");

    engine
        .mark_uploaded(&[login.guid().clone()], ServerTimestamp(9_000), &scope)
        .unwrap();
    assert!(outgoing_ids(&engine).is_empty());
    assert_eq!(store.get(login.id()).unwrap().unwrap().password(), "pw");
}

#[test]
fn sync_id_change_resets_checkpoint() {
    let store = unlocked_store();
    let engine = engine(&store);
    let ids = SyncIds {
        global: "g1".into(),
        collection: "c1".into(),
    };
    assert!(engine.ensure_sync_ids(&ids).unwrap());
    assert!(!engine.ensure_sync_ids(&ids).unwrap());

    engine.set_last_sync(ServerTimestamp(5_000)).unwrap();
    let other = SyncIds {
        global: "g2".into(),
        collection: "c1".into(),
    };
    assert!(engine.ensure_sync_ids(&other).unwrap());
    assert_eq!(engine.last_sync().unwrap(), ServerTimestamp(0));
}
