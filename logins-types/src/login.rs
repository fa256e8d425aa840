//! Login records.
//!
//! A login is split three ways:
//! - [`LoginFields`]: plain fields, stored and queried in the clear
//! - [`SecureLoginFields`]: username and password, encrypted at rest
//! - [`RecordFields`]: id plus usage metadata, always computed by the store
//!
//! Callers create and edit logins through [`LoginEntry`], which has no
//! metadata at all, so timestamps and usage counts can never be supplied
//! from outside the store.

use crate::Guid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The plain (unencrypted) fields of a login.
///
/// Exactly one of `form_action_origin` and `http_realm` is set on a valid
/// login: form logins carry the form's submit origin, HTTP auth logins carry
/// the realm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoginFields {
    /// The site origin, e.g. `https://www.example.com`.
    pub origin: String,
    /// Origin the login form submits to.
    pub form_action_origin: Option<String>,
    /// HTTP auth realm.
    pub http_realm: Option<String>,
    /// `name` attribute of the username input, if known.
    pub username_field: String,
    /// `name` attribute of the password input, if known.
    pub password_field: String,
}

/// The fields that are encrypted at rest.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecureLoginFields {
    /// May be empty. Never used as a key.
    pub username: String,
    pub password: String,
}

impl SecureLoginFields {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SecureLoginFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureLoginFields")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Store-computed metadata. All times are milliseconds since the epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordFields {
    pub id: Guid,
    pub times_used: i64,
    pub time_created: i64,
    pub time_last_used: i64,
    pub time_password_changed: i64,
}

/// Caller input for `add`, `update` and friends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginEntry {
    /// Optional caller-chosen id for `add`. Ignored by `update`.
    pub id: Option<Guid>,
    pub fields: LoginFields,
    pub sec_fields: SecureLoginFields,
}

impl LoginEntry {
    #[must_use]
    pub fn new(fields: LoginFields, sec_fields: SecureLoginFields) -> Self {
        Self {
            id: None,
            fields,
            sec_fields,
        }
    }

    /// Sets the id `add` should use instead of generating one.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Guid>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Convenience constructor for a form login.
    #[must_use]
    pub fn form(
        origin: impl Into<String>,
        form_action_origin: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(
            LoginFields {
                origin: origin.into(),
                form_action_origin: Some(form_action_origin.into()),
                ..Default::default()
            },
            SecureLoginFields::new(username, password),
        )
    }

    /// Convenience constructor for an HTTP auth login.
    #[must_use]
    pub fn http_auth(
        origin: impl Into<String>,
        realm: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(
            LoginFields {
                origin: origin.into(),
                http_realm: Some(realm.into()),
                ..Default::default()
            },
            SecureLoginFields::new(username, password),
        )
    }
}

/// A decrypted login as returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Login {
    pub record: RecordFields,
    pub fields: LoginFields,
    pub sec_fields: SecureLoginFields,
}

impl Login {
    #[must_use]
    pub fn new(record: RecordFields, fields: LoginFields, sec_fields: SecureLoginFields) -> Self {
        Self {
            record,
            fields,
            sec_fields,
        }
    }

    #[must_use]
    pub fn guid(&self) -> &Guid {
        &self.record.id
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.record.id.as_str()
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.sec_fields.username
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.sec_fields.password
    }

    /// The editable part of this login, with id and metadata dropped.
    #[must_use]
    pub fn entry(&self) -> LoginEntry {
        LoginEntry::new(self.fields.clone(), self.sec_fields.clone())
    }

    /// The time the password last changed, falling back to creation time
    /// for records written by clients that never set it.
    #[must_use]
    pub fn password_changed_at(&self) -> i64 {
        if self.record.time_password_changed > 0 {
            self.record.time_password_changed
        } else {
            self.record.time_created
        }
    }

    /// Whether `other` targets the same site: same origin plus the same
    /// form action origin or http realm.
    #[must_use]
    pub fn same_target(&self, other: &LoginFields) -> bool {
        self.fields.origin == other.origin
            && self.fields.form_action_origin == other.form_action_origin
            && self.fields.http_realm == other.http_realm
    }
}
