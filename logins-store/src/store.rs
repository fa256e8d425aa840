//! The store handle: lock state, poisoning and events on top of [`LoginDb`].

use crate::db::{ImportMetrics, LoginDb};
use crate::error::{LoginsError, LoginsResult};
use crate::interrupt::{InterruptHandle, InterruptScope};
use crate::key_manager;
use logins_crypto::{EncryptionKey, EncryptorDecryptor, KeyEncryptor, create_canary};
use logins_types::{Event, EventOutbox, Guid, KeyRegenerationReason, Login, LoginEntry, StoreEvent};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Receives key regeneration events, e.g. to count them per reason.
pub trait KeyEventSink: Send + Sync {
    fn key_regenerated(&self, reason: KeyRegenerationReason);
}

pub(crate) enum LockState {
    Locked,
    Unlocked(Arc<dyn EncryptorDecryptor>),
}

pub(crate) struct StoreState {
    pub(crate) db: LoginDb,
    pub(crate) lock: LockState,
}

/// A login store.
///
/// All access goes through one mutex, so writers queue instead of
/// interleaving. A panic while the mutex is held, or stored data that breaks
/// the store's invariants, poisons the handle: every later call fails with
/// [`LoginsError::Poisoned`].
pub struct LoginStore {
    state: Mutex<StoreState>,
    interrupt: Arc<InterruptHandle>,
    outbox: EventOutbox,
    poisoned: AtomicBool,
    key_events: Option<Arc<dyn KeyEventSink>>,
}

impl LoginStore {
    /// Opens (or creates) a store at `path`. The store starts locked.
    pub fn open(path: impl AsRef<Path>) -> LoginsResult<Self> {
        Ok(Self::new(LoginDb::open(path)?))
    }

    /// Opens a store backed by a private in-memory database.
    pub fn open_in_memory() -> LoginsResult<Self> {
        Ok(Self::new(LoginDb::open_in_memory()?))
    }

    #[must_use]
    pub fn new(db: LoginDb) -> Self {
        Self {
            interrupt: db.interrupt_handle(),
            state: Mutex::new(StoreState {
                db,
                lock: LockState::Locked,
            }),
            outbox: EventOutbox::default(),
            poisoned: AtomicBool::new(false),
            key_events: None,
        }
    }

    /// Routes key regeneration events to `sink` as well as the outbox.
    #[must_use]
    pub fn with_key_event_sink(mut self, sink: Arc<dyn KeyEventSink>) -> Self {
        self.key_events = Some(sink);
        self
    }

    // ── Plumbing ─────────────────────────────────────────────────

    pub(crate) fn state(&self) -> LoginsResult<MutexGuard<'_, StoreState>> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(LoginsError::Poisoned);
        }
        self.state.lock().map_err(|_| {
            self.poison("a panic occurred while the store was in use");
            LoginsError::Poisoned
        })
    }

    fn poison(&self, why: &str) {
        if !self.poisoned.swap(true, Ordering::SeqCst) {
            error!("login store poisoned: {why}");
        }
    }

    /// Poisons the handle when `result` carries an error that means the
    /// store can no longer be trusted.
    pub(crate) fn checked<T>(&self, result: LoginsResult<T>) -> LoginsResult<T> {
        if let Err(e) = &result {
            if e.poisons_handle() {
                self.poison(&e.to_string());
            }
        }
        result
    }

    /// Runs `f` against the database while holding the store lock. Fails
    /// with [`LoginsError::Locked`] unless the store is unlocked.
    pub fn with_unlocked<T>(
        &self,
        f: impl FnOnce(&LoginDb, &dyn EncryptorDecryptor) -> LoginsResult<T>,
    ) -> LoginsResult<T> {
        let state = self.state()?;
        let LockState::Unlocked(encdec) = &state.lock else {
            return Err(LoginsError::Locked);
        };
        let result = f(&state.db, encdec.as_ref());
        self.checked(result)
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// A handle that interrupts work running against this store from any
    /// thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        Arc::clone(&self.interrupt)
    }

    #[must_use]
    pub fn begin_interrupt_scope(&self) -> InterruptScope {
        self.interrupt.begin_scope()
    }

    /// The queue of events waiting for the host.
    #[must_use]
    pub fn outbox(&self) -> &EventOutbox {
        &self.outbox
    }

    /// Removes and returns queued events, oldest first.
    #[must_use]
    pub fn take_events(&self) -> Vec<Event> {
        self.outbox.drain()
    }

    pub(crate) fn notify_key_regenerated(&self, reason: KeyRegenerationReason) {
        if let Some(sink) = &self.key_events {
            sink.key_regenerated(reason);
        }
        self.outbox.push(StoreEvent::KeyRegenerated { reason });
    }

    // ── Lock state ───────────────────────────────────────────────

    pub fn is_locked(&self) -> LoginsResult<bool> {
        Ok(matches!(self.state()?.lock, LockState::Locked))
    }

    /// Unlocks the store with `key`. Fails with [`LoginsError::MismatchedLock`]
    /// when already unlocked and [`LoginsError::InvalidKey`] when the key
    /// does not match the stored data.
    pub fn unlock(&self, key: &str) -> LoginsResult<()> {
        let mut state = self.state()?;
        if matches!(state.lock, LockState::Unlocked(_)) {
            return Err(LoginsError::MismatchedLock);
        }
        let result = unlock_state(&mut state, key);
        self.checked(result)
    }

    /// Like [`unlock`](Self::unlock) but a no-op when already unlocked.
    pub fn ensure_unlocked(&self, key: &str) -> LoginsResult<()> {
        let mut state = self.state()?;
        if matches!(state.lock, LockState::Unlocked(_)) {
            return Ok(());
        }
        let result = unlock_state(&mut state, key);
        self.checked(result)
    }

    /// Locks the store, dropping the key. Fails with
    /// [`LoginsError::MismatchedLock`] when already locked.
    pub fn lock(&self) -> LoginsResult<()> {
        let mut state = self.state()?;
        if matches!(state.lock, LockState::Locked) {
            return Err(LoginsError::MismatchedLock);
        }
        state.lock = LockState::Locked;
        info!("login store locked");
        Ok(())
    }

    /// Like [`lock`](Self::lock) but a no-op when already locked.
    pub fn ensure_locked(&self) -> LoginsResult<()> {
        let mut state = self.state()?;
        if matches!(state.lock, LockState::Unlocked(_)) {
            state.lock = LockState::Locked;
            info!("login store locked");
        }
        Ok(())
    }

    /// Locks the store ahead of dropping it.
    pub fn close(&self) -> LoginsResult<()> {
        self.ensure_locked()
    }

    // ── Records ──────────────────────────────────────────────────

    pub fn list(&self) -> LoginsResult<Vec<Login>> {
        self.with_unlocked(|db, encdec| {
            db.get_all()?
                .into_iter()
                .map(|login| login.decrypt(encdec))
                .collect()
        })
    }

    pub fn get(&self, id: &str) -> LoginsResult<Option<Login>> {
        self.with_unlocked(|db, encdec| {
            db.get_by_id(id)?
                .map(|login| login.decrypt(encdec))
                .transpose()
        })
    }

    pub fn get_by_base_domain(&self, base_domain: &str) -> LoginsResult<Vec<Login>> {
        self.with_unlocked(|db, encdec| {
            db.get_by_base_domain(base_domain)?
                .into_iter()
                .map(|login| login.decrypt(encdec))
                .collect()
        })
    }

    pub fn find_login_to_update(&self, look: LoginEntry) -> LoginsResult<Option<Login>> {
        self.with_unlocked(|db, encdec| db.find_login_to_update(look, encdec))
    }

    /// Logins with the target of `entry` (origin plus realm or form action)
    /// other than `id`, whatever their username.
    pub fn potential_dupes_ignoring_username(
        &self,
        id: &str,
        entry: LoginEntry,
    ) -> LoginsResult<Vec<Login>> {
        self.with_unlocked(|db, encdec| {
            let entry = entry.fixup()?;
            db.potential_dupes_ignoring_username(&Guid::new(id), &entry.fields)?
                .into_iter()
                .map(|login| login.decrypt(encdec))
                .collect()
        })
    }

    pub fn exists(&self, id: &str) -> LoginsResult<bool> {
        self.with_unlocked(|db, _| db.exists(id))
    }

    pub fn count(&self) -> LoginsResult<i64> {
        self.with_unlocked(|db, _| db.count())
    }

    pub fn is_empty(&self) -> LoginsResult<bool> {
        Ok(self.count()? == 0)
    }

    pub fn add(&self, entry: LoginEntry) -> LoginsResult<Login> {
        let login = self.with_unlocked(|db, encdec| db.add(entry, encdec)?.decrypt(encdec))?;
        self.outbox.push(StoreEvent::Added {
            id: login.guid().clone(),
        });
        Ok(login)
    }

    pub fn update(&self, id: &str, entry: LoginEntry) -> LoginsResult<Login> {
        let login =
            self.with_unlocked(|db, encdec| db.update(id, entry, encdec)?.decrypt(encdec))?;
        self.outbox.push(StoreEvent::Updated {
            id: login.guid().clone(),
        });
        Ok(login)
    }

    /// Updates the login an upsert of `entry` matches, or adds a new one.
    pub fn add_or_update(&self, entry: LoginEntry) -> LoginsResult<Login> {
        let (login, existed) = self.with_unlocked(|db, encdec| {
            let existed = db.find_login_to_update(entry.clone(), encdec)?.is_some();
            Ok((db.add_or_update(entry, encdec)?.decrypt(encdec)?, existed))
        })?;
        let id = login.guid().clone();
        self.outbox.push(if existed {
            StoreEvent::Updated { id }
        } else {
            StoreEvent::Added { id }
        });
        Ok(login)
    }

    pub fn touch(&self, id: &str) -> LoginsResult<()> {
        self.with_unlocked(|db, _| db.touch(id))
    }

    /// Deletes a login. Returns `false` when there was nothing to delete.
    pub fn delete(&self, id: &str) -> LoginsResult<bool> {
        let deleted = self.with_unlocked(|db, _| db.delete(id))?;
        if deleted {
            self.outbox.push(StoreEvent::Deleted { id: id.into() });
        }
        Ok(deleted)
    }

    /// Deletes every login, leaving tombstones so the deletions sync.
    /// Interruptible through [`interrupt_handle`](Self::interrupt_handle).
    pub fn wipe(&self) -> LoginsResult<()> {
        let scope = self.begin_interrupt_scope();
        self.with_unlocked(|db, _| db.wipe(&scope))?;
        self.outbox.push(StoreEvent::Wiped { local_only: false });
        Ok(())
    }

    /// Drops all local and mirror state without tombstones.
    pub fn wipe_local(&self) -> LoginsResult<()> {
        self.with_unlocked(|db, _| db.wipe_local())?;
        self.outbox.push(StoreEvent::Wiped { local_only: true });
        Ok(())
    }

    /// Clears sync metadata. Login data is kept and will be uploaded again
    /// on the next sync.
    pub fn reset(&self) -> LoginsResult<()> {
        self.with_unlocked(|db, _| db.reset(&crate::sync::SyncAssociation::Disconnected))
    }

    pub fn import_multiple(&self, logins: Vec<Login>) -> LoginsResult<ImportMetrics> {
        self.with_unlocked(|db, encdec| db.import_multiple(logins, encdec))
    }
}

fn unlock_state(state: &mut StoreState, key: &str) -> LoginsResult<()> {
    let key = EncryptionKey::parse(key).map_err(|_| LoginsError::InvalidKey)?;
    if let key_manager::KeyValidity::Invalid(reason) = key_manager::check_key(&state.db, &key)? {
        warn!(%reason, "unlock rejected, key does not match stored data");
        return Err(LoginsError::InvalidKey);
    }
    if state.db.key_canary()?.is_none() {
        state.db.set_key_canary(&create_canary(&key)?)?;
    }
    state.lock = LockState::Unlocked(Arc::new(KeyEncryptor::new(key)));
    info!("login store unlocked");
    Ok(())
}
