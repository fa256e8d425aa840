//! Wire format of login records on the sync server.
//!
//! Field names follow the server's historical schema (`hostname`,
//! `formSubmitURL`) rather than the store's. Timestamps are parsed
//! leniently: anything that is not a positive integer reads as 0, which the
//! merge treats as "unknown".

use logins_types::{
    Guid, InvalidLogin, Login, LoginEntry, LoginFields, RecordFields, SecureLoginFields,
    ServerTimestamp,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Sort index for tombstones, so clients that want deletions first can
/// download them first.
pub const TOMBSTONE_SORTINDEX: i32 = 5_000_000;
/// Sort index for live records.
pub const DEFAULT_SORTINDEX: i32 = 1;

/// A live login as stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub id: Guid,
    #[serde(rename = "hostname")]
    pub origin: String,
    #[serde(rename = "formSubmitURL", default, skip_serializing_if = "Option::is_none")]
    pub form_action_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_realm: Option<String>,
    #[serde(default)]
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub username_field: String,
    #[serde(default)]
    pub password_field: String,
    #[serde(default, deserialize_with = "lenient_positive")]
    pub time_created: i64,
    #[serde(default, deserialize_with = "lenient_positive")]
    pub time_last_used: i64,
    #[serde(default, deserialize_with = "lenient_positive")]
    pub time_password_changed: i64,
    #[serde(default, deserialize_with = "lenient_positive")]
    pub times_used: i64,
}

fn lenient_positive<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_i64().filter(|v| *v > 0).unwrap_or(0))
}

impl LoginPayload {
    /// Converts to a login, repairing what can be repaired.
    pub fn into_login(self) -> Result<Login, InvalidLogin> {
        let entry = LoginEntry::new(
            LoginFields {
                origin: self.origin,
                form_action_origin: self.form_action_origin,
                http_realm: self.http_realm,
                username_field: self.username_field,
                password_field: self.password_field,
            },
            SecureLoginFields::new(self.username, self.password),
        )
        .fixup()?;
        Ok(Login::new(
            RecordFields {
                id: self.id,
                times_used: self.times_used,
                time_created: self.time_created,
                time_last_used: self.time_last_used,
                time_password_changed: self.time_password_changed,
            },
            entry.fields,
            entry.sec_fields,
        ))
    }
}

impl From<Login> for LoginPayload {
    fn from(login: Login) -> Self {
        Self {
            id: login.record.id,
            origin: login.fields.origin,
            form_action_origin: login.fields.form_action_origin,
            http_realm: login.fields.http_realm,
            username: login.sec_fields.username,
            password: login.sec_fields.password,
            username_field: login.fields.username_field,
            password_field: login.fields.password_field,
            time_created: login.record.time_created,
            time_last_used: login.record.time_last_used,
            time_password_changed: login.record.time_password_changed,
            times_used: login.record.times_used,
        }
    }
}

#[derive(Serialize)]
struct TombstonePayload {
    id: Guid,
    deleted: bool,
}

/// A record as the server hands it out: id, modification time and the
/// (already decrypted) JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEnvelope {
    pub id: Guid,
    pub modified: ServerTimestamp,
    pub payload: String,
}

/// What an incoming record turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingPayload {
    Record(Login),
    Tombstone,
    /// Unparseable or invalid beyond repair. Counted as failed and skipped.
    Malformed(String),
}

/// A parsed incoming record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRecord {
    pub id: Guid,
    pub payload: IncomingPayload,
    pub modified: ServerTimestamp,
}

impl IncomingRecord {
    #[must_use]
    pub fn from_envelope(envelope: IncomingEnvelope) -> Self {
        let payload = parse_payload(&envelope.id, &envelope.payload);
        Self {
            id: envelope.id,
            payload,
            modified: envelope.modified,
        }
    }
}

fn parse_payload(id: &Guid, json: &str) -> IncomingPayload {
    let value: Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(e) => return IncomingPayload::Malformed(format!("invalid JSON: {e}")),
    };
    if value.get("id").and_then(Value::as_str) != Some(id.as_str()) {
        return IncomingPayload::Malformed("payload id does not match envelope".into());
    }
    if value.get("deleted").and_then(Value::as_bool) == Some(true) {
        return IncomingPayload::Tombstone;
    }
    match serde_json::from_value::<LoginPayload>(value) {
        Ok(payload) => match payload.into_login() {
            Ok(login) => IncomingPayload::Record(login),
            Err(e) => IncomingPayload::Malformed(e.to_string()),
        },
        Err(e) => IncomingPayload::Malformed(e.to_string()),
    }
}

/// A record ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRecord {
    pub id: Guid,
    /// JSON body.
    pub payload: String,
    pub sortindex: i32,
}

impl OutgoingRecord {
    pub fn from_login(login: Login) -> serde_json::Result<Self> {
        let id = login.guid().clone();
        let payload = serde_json::to_string(&LoginPayload::from(login))?;
        Ok(Self {
            id,
            payload,
            sortindex: DEFAULT_SORTINDEX,
        })
    }

    pub fn tombstone(id: Guid) -> serde_json::Result<Self> {
        let payload = serde_json::to_string(&TombstonePayload {
            id: id.clone(),
            deleted: true,
        })?;
        Ok(Self {
            id,
            payload,
            sortindex: TOMBSTONE_SORTINDEX,
        })
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.sortindex == TOMBSTONE_SORTINDEX
    }
}
