use logins_types::{
    Event, EventId, EventOutbox, Guid, KeyRegenerationReason, Login, LoginEntry, LoginFields,
    RecordFields, SecureLoginFields, StoreEvent,
};
use std::str::FromStr;

// ── EventId ──────────────────────────────────────────────────────

#[test]
fn event_ids_are_unique() {
    let a = EventId::new();
    let b = EventId::new();
    assert_ne!(a, b);
}

#[test]
fn event_id_display_parse() {
    let id = EventId::new();
    assert_eq!(EventId::from_str(&id.to_string()).unwrap(), id);
    assert!(EventId::from_str("not-a-uuid").is_err());
}

// ── Serialization ────────────────────────────────────────────────

#[test]
fn events_serialize_with_type_tag() {
    let event = Event::new(StoreEvent::KeyRegenerated {
        reason: KeyRegenerationReason::Corrupt,
    });
    let json = event.to_json().unwrap();
    assert!(json.contains("\"type\":\"KeyRegenerated\""));
    assert!(json.contains("\"reason\":\"corrupt\""));

    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

// ── Outbox ───────────────────────────────────────────────────────

#[test]
fn outbox_drains_in_order() {
    let outbox = EventOutbox::default();
    outbox.push(StoreEvent::Added { id: Guid::new("a") });
    outbox.push(StoreEvent::Deleted { id: Guid::new("a") });
    assert_eq!(outbox.len(), 2);

    let events: Vec<StoreEvent> = outbox.drain().into_iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![
            StoreEvent::Added { id: Guid::new("a") },
            StoreEvent::Deleted { id: Guid::new("a") },
        ]
    );
    assert!(outbox.is_empty());
}

#[test]
fn outbox_drops_oldest_when_full() {
    let outbox = EventOutbox::with_capacity(2);
    for id in ["a", "b", "c"] {
        outbox.push(StoreEvent::Added { id: Guid::new(id) });
    }
    let ids: Vec<StoreEvent> = outbox.drain().into_iter().map(|e| e.event).collect();
    assert_eq!(
        ids,
        vec![
            StoreEvent::Added { id: Guid::new("b") },
            StoreEvent::Added { id: Guid::new("c") },
        ]
    );
}

// ── Login helpers ────────────────────────────────────────────────

#[test]
fn entry_strips_metadata_and_id() {
    let login = Login::new(
        RecordFields {
            id: Guid::new("abcdefabcdef"),
            times_used: 9,
            time_created: 1,
            time_last_used: 2,
            time_password_changed: 3,
        },
        LoginFields {
            origin: "https://example.com".into(),
            http_realm: Some("r".into()),
            ..Default::default()
        },
        SecureLoginFields::new("u", "p"),
    );
    let entry = login.entry();
    assert_eq!(entry.id, None);
    assert_eq!(entry, LoginEntry::http_auth("https://example.com", "r", "u", "p"));
}

#[test]
fn password_changed_falls_back_to_created() {
    let mut login = Login::default();
    login.record.time_created = 10;
    assert_eq!(login.password_changed_at(), 10);
    login.record.time_password_changed = 20;
    assert_eq!(login.password_changed_at(), 20);
}

#[test]
fn secure_fields_debug_is_redacted() {
    let s = format!("{:?}", SecureLoginFields::new("alice", "hunter2"));
    assert!(!s.contains("alice"));
    assert!(!s.contains("hunter2"));
}
