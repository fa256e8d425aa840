//! Field-level three-way merge.
//!
//! Each side's changes are expressed as a [`LoginDelta`] against the shared
//! parent (the mirror). Two deltas are merged field by field: a field changed
//! on one side only is taken from that side; a field changed on both sides
//! goes to whichever side [`Precedence`] says is newer. `times_used` is a
//! counter and its deltas add up.

use logins_types::Login;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Which side wins when both sides are equally recent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Converge on the server's view.
    #[default]
    PreferRemote,
    PreferLocal,
}

/// One side of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl TieBreak {
    /// The winner given how the local timestamp compares to the remote one.
    #[must_use]
    pub fn newer(self, local_vs_remote: Ordering) -> Side {
        match local_vs_remote {
            Ordering::Greater => Side::Local,
            Ordering::Less => Side::Remote,
            Ordering::Equal => match self {
                Self::PreferRemote => Side::Remote,
                Self::PreferLocal => Side::Local,
            },
        }
    }
}

/// Which side wins a field collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precedence {
    /// For `password` and `time_password_changed`.
    pub password: Side,
    /// For every other field.
    pub other: Side,
}

/// Changes one version of a login makes relative to an older version.
///
/// `None` means unchanged. For the optional target fields, `Some(None)`
/// means the field was cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginDelta {
    pub origin: Option<String>,
    pub http_realm: Option<Option<String>>,
    pub form_action_origin: Option<Option<String>>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub username_field: Option<String>,
    pub password_field: Option<String>,

    pub time_created: Option<i64>,
    pub time_last_used: Option<i64>,
    pub time_password_changed: Option<i64>,

    /// Added, not replaced.
    pub times_used: i64,
}

impl LoginDelta {
    /// What `newer` changed relative to `older`.
    ///
    /// Zero and negative timestamps mean "unknown" and never count as a
    /// change, nor does a non-positive `times_used`.
    #[must_use]
    pub fn between(newer: &Login, older: &Login) -> Self {
        fn changed<T: PartialEq + Clone>(new: &T, old: &T) -> Option<T> {
            (new != old).then(|| new.clone())
        }
        fn changed_time(new: i64, old: i64) -> Option<i64> {
            (new > 0 && new != old).then_some(new)
        }

        Self {
            origin: changed(&newer.fields.origin, &older.fields.origin),
            http_realm: changed(&newer.fields.http_realm, &older.fields.http_realm),
            form_action_origin: changed(
                &newer.fields.form_action_origin,
                &older.fields.form_action_origin,
            ),
            username: changed(&newer.sec_fields.username, &older.sec_fields.username),
            password: changed(&newer.sec_fields.password, &older.sec_fields.password),
            username_field: changed(&newer.fields.username_field, &older.fields.username_field),
            password_field: changed(&newer.fields.password_field, &older.fields.password_field),
            time_created: changed_time(newer.record.time_created, older.record.time_created),
            time_last_used: changed_time(newer.record.time_last_used, older.record.time_last_used),
            time_password_changed: changed_time(
                newer.record.time_password_changed,
                older.record.time_password_changed,
            ),
            times_used: if newer.record.times_used > 0 {
                newer.record.times_used - older.record.times_used
            } else {
                0
            },
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merges the local delta (`self`) with the remote one.
    #[must_use]
    pub fn merge(self, remote: LoginDelta, precedence: Precedence) -> LoginDelta {
        fn pick<T>(name: &str, local: Option<T>, remote: Option<T>, winner: Side) -> Option<T> {
            match (local, remote) {
                (Some(local), Some(remote)) => {
                    debug!("collision merging login field {name}, {winner:?} wins");
                    match winner {
                        Side::Local => Some(local),
                        Side::Remote => Some(remote),
                    }
                }
                (local, remote) => local.or(remote),
            }
        }

        let other = precedence.other;
        LoginDelta {
            origin: pick("origin", self.origin, remote.origin, other),
            http_realm: pick("http_realm", self.http_realm, remote.http_realm, other),
            form_action_origin: pick(
                "form_action_origin",
                self.form_action_origin,
                remote.form_action_origin,
                other,
            ),
            username: pick("username", self.username, remote.username, other),
            password: pick("password", self.password, remote.password, precedence.password),
            username_field: pick(
                "username_field",
                self.username_field,
                remote.username_field,
                other,
            ),
            password_field: pick(
                "password_field",
                self.password_field,
                remote.password_field,
                other,
            ),
            time_created: pick("time_created", self.time_created, remote.time_created, other),
            time_last_used: pick(
                "time_last_used",
                self.time_last_used,
                remote.time_last_used,
                other,
            ),
            time_password_changed: pick(
                "time_password_changed",
                self.time_password_changed,
                remote.time_password_changed,
                precedence.password,
            ),
            times_used: self.times_used + remote.times_used,
        }
    }

    /// Applies this delta to `login` in place.
    pub fn apply_to(self, login: &mut Login) {
        if let Some(origin) = self.origin {
            login.fields.origin = origin;
        }
        if let Some(http_realm) = self.http_realm {
            login.fields.http_realm = http_realm;
        }
        if let Some(form_action_origin) = self.form_action_origin {
            login.fields.form_action_origin = form_action_origin;
        }
        if let Some(username) = self.username {
            login.sec_fields.username = username;
        }
        if let Some(password) = self.password {
            login.sec_fields.password = password;
        }
        if let Some(username_field) = self.username_field {
            login.fields.username_field = username_field;
        }
        if let Some(password_field) = self.password_field {
            login.fields.password_field = password_field;
        }
        if let Some(t) = self.time_created {
            login.record.time_created = t;
        }
        if let Some(t) = self.time_last_used {
            login.record.time_last_used = t;
        }
        if let Some(t) = self.time_password_changed {
            login.record.time_password_changed = t;
        }
        login.record.times_used = (login.record.times_used + self.times_used).max(0);
    }
}

/// Three-way merges `local` and `remote` against their shared `parent`.
#[must_use]
pub fn three_way_merge(parent: &Login, local: &Login, remote: &Login, precedence: Precedence) -> Login {
    let local_delta = LoginDelta::between(local, parent);
    let remote_delta = LoginDelta::between(remote, parent);
    let mut merged = parent.clone();
    local_delta.merge(remote_delta, precedence).apply_to(&mut merged);
    merged
}
