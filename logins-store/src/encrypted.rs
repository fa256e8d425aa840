//! Logins as they sit in the database, with secure fields still sealed.

use crate::error::{LoginsError, LoginsResult};
use logins_crypto::{CryptoError, EncryptorDecryptor, EncryptorDecryptorExt};
use logins_types::{Guid, Login, LoginFields, RecordFields, SecureLoginFields};
use rusqlite::Row;

/// Local sync state of a `loginsL` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SyncStatus {
    /// Matches the mirror; nothing to upload.
    Synced = 0,
    /// Edited or deleted since the last sync.
    Changed = 1,
    /// Never uploaded.
    New = 2,
}

impl SyncStatus {
    pub(crate) fn from_u8(v: u8) -> LoginsResult<Self> {
        match v {
            0 => Ok(Self::Synced),
            1 => Ok(Self::Changed),
            2 => Ok(Self::New),
            other => Err(LoginsError::Corrupt(format!("unknown sync_status {other}"))),
        }
    }
}

/// A login whose `secFields` column has not been decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedLogin {
    pub record: RecordFields,
    pub fields: LoginFields,
    pub sec_fields: String,
}

impl EncryptedLogin {
    #[must_use]
    pub fn guid(&self) -> &Guid {
        &self.record.id
    }

    /// Builds an encrypted login from a row that selected
    /// [`COMMON_COLS`](crate::schema::COMMON_COLS).
    pub(crate) fn from_row(row: &Row<'_>) -> LoginsResult<Self> {
        Ok(Self {
            record: RecordFields {
                id: Guid::new(row.get::<_, String>("guid")?),
                times_used: row.get("timesUsed")?,
                time_created: row.get("timeCreated")?,
                time_last_used: row.get::<_, Option<i64>>("timeLastUsed")?.unwrap_or_default(),
                time_password_changed: row.get("timePasswordChanged")?,
            },
            fields: LoginFields {
                origin: row.get("origin")?,
                http_realm: row.get("httpRealm")?,
                form_action_origin: row.get("formActionOrigin")?,
                username_field: row
                    .get::<_, Option<String>>("usernameField")?
                    .unwrap_or_default(),
                password_field: row
                    .get::<_, Option<String>>("passwordField")?
                    .unwrap_or_default(),
            },
            sec_fields: row.get::<_, Option<String>>("secFields")?.unwrap_or_default(),
        })
    }

    pub fn decrypt_fields(&self, encdec: &dyn EncryptorDecryptor) -> LoginsResult<SecureLoginFields> {
        encdec
            .decrypt_struct(&self.sec_fields)
            .map_err(|e| match e {
                CryptoError::Decryption(_) | CryptoError::Malformed(_) => {
                    LoginsError::DecryptionFailed(self.record.id.to_string())
                }
                other => other.into(),
            })
    }

    pub fn decrypt(self, encdec: &dyn EncryptorDecryptor) -> LoginsResult<Login> {
        let sec_fields = self.decrypt_fields(encdec)?;
        Ok(Login::new(self.record, self.fields, sec_fields))
    }

    pub fn encrypt(login: Login, encdec: &dyn EncryptorDecryptor) -> LoginsResult<Self> {
        Ok(Self {
            sec_fields: encdec.encrypt_struct(&login.sec_fields)?,
            record: login.record,
            fields: login.fields,
        })
    }
}
