//! Shared test helpers for store tests.

#![allow(dead_code)]

use logins_crypto::EncryptionKey;
use logins_store::LoginStore;
use logins_types::LoginEntry;
use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs a test subscriber once per binary. Set `RUST_LOG` to see output.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A fresh key in its exported string form.
pub fn new_key() -> String {
    EncryptionKey::generate().to_base64().as_str().to_owned()
}

/// An in-memory store, already unlocked, plus its key.
pub fn unlocked_store() -> (LoginStore, String) {
    init_tracing();
    let store = LoginStore::open_in_memory().unwrap();
    let key = new_key();
    store.unlock(&key).unwrap();
    (store, key)
}

pub fn form_entry(origin: &str, username: &str, password: &str) -> LoginEntry {
    LoginEntry::form(origin, origin, username, password)
}

pub fn realm_entry(origin: &str, username: &str, password: &str) -> LoginEntry {
    LoginEntry::http_auth(origin, "Private area", username, password)
}
