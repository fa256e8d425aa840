//! Encryption key lifecycle: validation, regeneration and rekeying.
//!
//! The host owns the key string; the store only keeps a canary sealed under
//! it. A key is valid when it opens the canary. Stores written before the
//! canary existed are checked against one stored ciphertext instead.

use crate::error::{LoginsError, LoginsResult};
use crate::db::LoginDb;
use crate::schema::{KEY_CANARY_META_KEY, LAST_SYNC_META_KEY};
use crate::store::{LockState, LoginStore};
use logins_crypto::{
    CanaryCheck, EncryptionKey, EncryptorDecryptor, KeyEncryptor, check_canary, create_canary,
};
use logins_types::KeyRegenerationReason;
use rusqlite::{OptionalExtension, named_params};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of checking a key against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValidity {
    Valid,
    Invalid(KeyRegenerationReason),
}

impl KeyValidity {
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl LoginDb {
    pub(crate) fn key_canary(&self) -> LoginsResult<Option<String>> {
        self.get_meta(KEY_CANARY_META_KEY)
    }

    pub(crate) fn set_key_canary(&self, canary: &str) -> LoginsResult<()> {
        self.put_meta(KEY_CANARY_META_KEY, &canary)
    }

    /// Any one stored ciphertext.
    fn sample_ciphertext(&self) -> LoginsResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT secFields FROM loginsL WHERE is_deleted = 0 AND secFields != ''
                 UNION ALL
                 SELECT secFields FROM loginsM WHERE secFields != ''
                 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Re-seals every stored `secFields` value from `old` to `new`.
    fn reencrypt_all(
        &self,
        old: &dyn EncryptorDecryptor,
        new: &dyn EncryptorDecryptor,
    ) -> LoginsResult<usize> {
        let mut count = 0;
        for table in ["loginsL", "loginsM"] {
            let rows: Vec<(String, String)> = {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT guid, secFields FROM {table}
                     WHERE secFields IS NOT NULL AND secFields != ''"
                ))?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<Result<_, _>>()?
            };
            let mut update = self.conn.prepare(&format!(
                "UPDATE {table} SET secFields = :sec_fields WHERE guid = :guid"
            ))?;
            for (guid, ciphertext) in rows {
                let plaintext = zeroize::Zeroizing::new(
                    old.decrypt(&ciphertext)
                        .map_err(|_| LoginsError::DecryptionFailed(guid.clone()))?,
                );
                let resealed = new.encrypt(&plaintext)?;
                update.execute(named_params! { ":sec_fields": resealed, ":guid": guid })?;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Checks `key` against the canary, or against stored data when there is
/// no canary yet.
pub(crate) fn check_key(db: &LoginDb, key: &EncryptionKey) -> LoginsResult<KeyValidity> {
    if let Some(canary) = db.key_canary()? {
        return Ok(match check_canary(&canary, key) {
            Ok(CanaryCheck::Match) => KeyValidity::Valid,
            Ok(CanaryCheck::WrongKey) => KeyValidity::Invalid(KeyRegenerationReason::Corrupt),
            Ok(CanaryCheck::UnexpectedContent) => {
                KeyValidity::Invalid(KeyRegenerationReason::Other)
            }
            Err(e) => {
                warn!("stored key canary is unreadable: {e}");
                KeyValidity::Invalid(KeyRegenerationReason::Corrupt)
            }
        });
    }
    Ok(match db.sample_ciphertext()? {
        None => KeyValidity::Valid,
        Some(ciphertext) => {
            if KeyEncryptor::new(key.clone()).decrypt(&ciphertext).is_ok() {
                KeyValidity::Valid
            } else {
                KeyValidity::Invalid(KeyRegenerationReason::Corrupt)
            }
        }
    })
}

impl LoginStore {
    /// Checks whether `key` can unlock this store. Works in either lock
    /// state.
    pub fn validate_key(&self, key: &str) -> LoginsResult<KeyValidity> {
        if key.is_empty() {
            return Ok(KeyValidity::Invalid(KeyRegenerationReason::Lost));
        }
        let Ok(key) = EncryptionKey::parse(key) else {
            return Ok(KeyValidity::Invalid(KeyRegenerationReason::Corrupt));
        };
        let state = self.state()?;
        let result = check_key(&state.db, &key);
        self.checked(result)
    }

    /// Replaces the store key with a fresh one and returns it.
    ///
    /// Every login encrypted under the old key is deleted, and the sync
    /// checkpoint goes back to zero so the server copies are downloaded
    /// again. The store is left locked; unlock it with the returned key.
    pub fn regenerate_key(&self, reason: KeyRegenerationReason) -> LoginsResult<String> {
        let mut state = self.state()?;
        warn!(%reason, "regenerating encryption key, encrypted logins are discarded");
        let key = EncryptionKey::generate();
        let result = discard_encrypted_data(&state.db, &key);
        self.checked(result)?;
        state.lock = LockState::Locked;
        drop(state);

        self.notify_key_regenerated(reason);
        let exported = key.to_base64();
        Ok(exported.as_str().to_owned())
    }

    /// Re-encrypts everything under `new_key`. On failure nothing changes
    /// and the old key stays in use.
    pub fn rekey(&self, new_key: &str) -> LoginsResult<()> {
        let new_key = EncryptionKey::parse(new_key).map_err(|_| LoginsError::InvalidKey)?;
        let mut state = self.state()?;
        let old = match &state.lock {
            LockState::Unlocked(encdec) => Arc::clone(encdec),
            LockState::Locked => return Err(LoginsError::Locked),
        };
        let new = Arc::new(KeyEncryptor::new(new_key.clone()));
        let result = rekey_data(&state.db, old.as_ref(), new.as_ref(), &new_key);
        let count = self.checked(result)?;
        state.lock = LockState::Unlocked(new);
        info!(count, "login store rekeyed");
        Ok(())
    }
}

fn discard_encrypted_data(db: &LoginDb, key: &EncryptionKey) -> LoginsResult<()> {
    let tx = db.conn.unchecked_transaction()?;
    tx.execute("DELETE FROM loginsL", [])?;
    tx.execute("DELETE FROM loginsM", [])?;
    db.put_meta(LAST_SYNC_META_KEY, &0i64)?;
    db.set_key_canary(&create_canary(key)?)?;
    tx.commit()?;
    Ok(())
}

fn rekey_data(
    db: &LoginDb,
    old: &dyn EncryptorDecryptor,
    new: &dyn EncryptorDecryptor,
    new_key: &EncryptionKey,
) -> LoginsResult<usize> {
    let tx = db.conn.unchecked_transaction()?;
    let count = db.reencrypt_all(old, new)?;
    db.set_key_canary(&create_canary(new_key)?)?;
    tx.commit()?;
    Ok(count)
}
