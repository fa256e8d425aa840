use logins_types::Guid;
use proptest::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;

// ── Guid ─────────────────────────────────────────────────────────

#[test]
fn random_guid_is_twelve_url_safe_chars() {
    let guid = Guid::random();
    assert_eq!(guid.as_str().len(), 12);
    assert!(guid.is_valid_for_sync_server());
}

#[test]
fn random_guids_do_not_collide() {
    let ids: HashSet<Guid> = (0..1000).map(|_| Guid::random()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn new_accepts_anything() {
    let guid = Guid::new("{legacy id with spaces}");
    assert_eq!(guid.as_str(), "{legacy id with spaces}");
    assert!(!guid.is_valid_for_sync_server());
}

#[test]
fn from_str_rejects_server_invalid_ids() {
    assert!(Guid::from_str("").is_err());
    assert!(Guid::from_str("has space").is_err());
    assert!(Guid::from_str(&"a".repeat(65)).is_err());
    assert_eq!(Guid::from_str("abc-DEF_123").unwrap(), "abc-DEF_123");
}

#[test]
fn guid_serializes_as_plain_string() {
    let guid = Guid::new("aaaaaaaaaaaa");
    assert_eq!(serde_json::to_string(&guid).unwrap(), "\"aaaaaaaaaaaa\"");
}

proptest! {
    #[test]
    fn prop_server_valid_strings_parse(s in "[A-Za-z0-9_-]{1,64}") {
        let guid = Guid::from_str(&s).unwrap();
        prop_assert_eq!(guid.as_str(), s.as_str());
    }

    #[test]
    fn prop_random_guid_always_server_valid(_seed in 0u32..200) {
        prop_assert!(Guid::random().is_valid_for_sync_server());
    }
}
