//! Shared test helpers for sync tests.

#![allow(dead_code)]

use logins_crypto::EncryptionKey;
use logins_store::LoginStore;
use logins_sync::mock::InMemoryServer;
use logins_sync::{
    AuthInfo, IncomingEnvelope, LoginsSyncEngine, OutgoingRecord, StaticTokenProvider,
    SyncConfig, SyncCoordinator, TelemetryAggregator, TieBreak,
};
use logins_types::{
    Guid, Login, LoginEntry, LoginFields, RecordFields, SecureLoginFields, ServerTimestamp,
};
use std::sync::{Arc, Once};

pub const ORIGIN: &str = "https://example.com";

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

pub fn new_key() -> String {
    EncryptionKey::generate().to_base64().as_str().to_owned()
}

/// An in-memory store, already unlocked.
pub fn unlocked_store() -> Arc<LoginStore> {
    init_tracing();
    let store = LoginStore::open_in_memory().unwrap();
    store.unlock(&new_key()).unwrap();
    Arc::new(store)
}

pub fn engine(store: &Arc<LoginStore>) -> LoginsSyncEngine {
    LoginsSyncEngine::new(Arc::clone(store), TieBreak::default())
}

pub fn form_entry(username: &str, password: &str) -> LoginEntry {
    LoginEntry::form(ORIGIN, ORIGIN, username, password)
}

/// A login as another client would have uploaded it.
pub fn remote_login(id: &str, username: &str, password: &str, password_changed: i64) -> Login {
    Login::new(
        RecordFields {
            id: Guid::new(id),
            times_used: 3,
            time_created: 1_000,
            time_last_used: password_changed,
            time_password_changed: password_changed,
        },
        LoginFields {
            origin: ORIGIN.into(),
            form_action_origin: Some(ORIGIN.into()),
            ..Default::default()
        },
        SecureLoginFields::new(username, password),
    )
}

pub fn envelope(login: Login, modified: i64) -> IncomingEnvelope {
    let record = OutgoingRecord::from_login(login).unwrap();
    IncomingEnvelope {
        id: record.id,
        modified: ServerTimestamp(modified),
        payload: record.payload,
    }
}

pub fn tombstone_envelope(id: &str, modified: i64) -> IncomingEnvelope {
    let record = OutgoingRecord::tombstone(Guid::new(id)).unwrap();
    IncomingEnvelope {
        id: record.id,
        modified: ServerTimestamp(modified),
        payload: record.payload,
    }
}

pub fn raw_envelope(id: &str, modified: i64, payload: &str) -> IncomingEnvelope {
    IncomingEnvelope {
        id: Guid::new(id),
        modified: ServerTimestamp(modified),
        payload: payload.to_owned(),
    }
}

pub fn auth_info() -> AuthInfo {
    AuthInfo {
        key_id: "1234-abcd".into(),
        access_token: "access-token".into(),
        sync_key: "sync-key".into(),
        token_server_url: "https://token.example.com/1.0/sync/1.5".into(),
    }
}

/// One client: a store, its coordinator and a telemetry aggregator, talking
/// to a shared server.
pub struct Client {
    pub store: Arc<LoginStore>,
    pub telemetry: Arc<TelemetryAggregator>,
    pub coordinator: SyncCoordinator,
}

pub fn client(server: &Arc<InMemoryServer>) -> Client {
    client_with_config(server, SyncConfig::default())
}

pub fn client_with_config(server: &Arc<InMemoryServer>, config: SyncConfig) -> Client {
    let store = unlocked_store();
    let telemetry = Arc::new(TelemetryAggregator::new());
    let coordinator = SyncCoordinator::new(
        Arc::clone(&store),
        Arc::new(StaticTokenProvider::new(auth_info())),
        Arc::clone(server) as Arc<dyn logins_sync::SyncClient>,
        config,
    )
    .with_telemetry(Arc::clone(&telemetry) as Arc<dyn logins_sync::TelemetrySink>);
    Client {
        store,
        telemetry,
        coordinator,
    }
}
