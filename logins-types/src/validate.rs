//! Validation and fixups for caller supplied logins.
//!
//! `check_valid` rejects anything that breaks a record invariant. `fixup`
//! repairs what can be repaired (un-normalized origins, both targets set,
//! stray form hints) and rejects the rest. Records arriving from sync are
//! passed through `fixup` so that legacy data from other clients survives.

use crate::login::{LoginEntry, LoginFields, SecureLoginFields};
use crate::origin::Origin;
use thiserror::Error;
use tracing::warn;

/// Why a login was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidLogin {
    /// The origin (hostname) is empty.
    #[error("origin is empty")]
    EmptyOrigin,

    /// The password is empty.
    #[error("password is empty")]
    EmptyPassword,

    /// A login with the same target and username already exists.
    #[error("login already exists")]
    DuplicateLogin,

    /// Both `http_realm` and `form_action_origin` are set.
    #[error("both http_realm and form_action_origin are set")]
    BothTargets,

    /// Neither `http_realm` nor `form_action_origin` is set.
    #[error("neither http_realm nor form_action_origin is set")]
    NoTarget,

    /// A field holds a value that other clients cannot store.
    #[error("illegal field value: {field_info}")]
    IllegalFieldValue { field_info: String },
}

impl InvalidLogin {
    fn illegal(field_info: impl Into<String>) -> Self {
        Self::IllegalFieldValue {
            field_info: field_info.into(),
        }
    }
}

impl LoginEntry {
    /// Checks the entry without repairing anything.
    pub fn check_valid(&self) -> Result<(), InvalidLogin> {
        validate_and_fixup(&self.fields, &self.sec_fields, false)?;
        Ok(())
    }

    /// Returns the entry itself or a repaired copy, or an error when the
    /// entry cannot be repaired.
    pub fn fixup(self) -> Result<Self, InvalidLogin> {
        match self.maybe_fixup()? {
            Some(fixed) => Ok(fixed),
            None => Ok(self),
        }
    }

    /// Like [`LoginEntry::fixup`] but borrows, returning `None` when the entry
    /// is already valid as-is.
    pub fn maybe_fixup(&self) -> Result<Option<Self>, InvalidLogin> {
        Ok(validate_and_fixup(&self.fields, &self.sec_fields, true)?.map(|fields| Self {
            id: self.id.clone(),
            fields,
            sec_fields: self.sec_fields.clone(),
        }))
    }
}

/// Normalizes an origin, returning `Some` with the canonical form when it
/// differs from the input.
fn fixup_origin(origin: &str, what: &str) -> Result<Option<String>, InvalidLogin> {
    let parsed =
        Origin::parse(origin).ok_or_else(|| InvalidLogin::illegal(format!("`{what}` is malformed")))?;
    let canonical = parsed.serialize();
    Ok((canonical != origin).then_some(canonical))
}

/// Shared body of `check_valid` and `fixup`. Returns the repaired fields,
/// `None` when nothing needed repairing.
pub(crate) fn validate_and_fixup(
    fields: &LoginFields,
    sec_fields: &SecureLoginFields,
    fixup: bool,
) -> Result<Option<LoginFields>, InvalidLogin> {
    let mut fixed: Option<LoginFields> = None;

    // Either records the repair on a copy of `fields`, or fails with `$err`
    // when repairs are not allowed.
    macro_rules! fixed_or_fail {
        ($err:expr) => {{
            let err = $err;
            if !fixup {
                return Err(err);
            }
            warn!("fixing login record: {err}");
            fixed.get_or_insert_with(|| fields.clone())
        }};
    }

    if fields.origin.is_empty() {
        return Err(InvalidLogin::EmptyOrigin);
    }
    if sec_fields.password.is_empty() {
        return Err(InvalidLogin::EmptyPassword);
    }
    if fields.form_action_origin.is_some() && fields.http_realm.is_some() {
        fixed_or_fail!(InvalidLogin::BothTargets).http_realm = None;
    }
    if fields.form_action_origin.is_none() && fields.http_realm.is_none() {
        return Err(InvalidLogin::NoTarget);
    }

    let form_action_origin = fields.form_action_origin.clone().unwrap_or_default();
    let http_realm = fixed
        .as_ref()
        .unwrap_or(fields)
        .http_realm
        .clone()
        .unwrap_or_default();
    let checked = [
        ("form_action_origin", form_action_origin.as_str()),
        ("http_realm", http_realm.as_str()),
        ("origin", fields.origin.as_str()),
        ("username_field", fields.username_field.as_str()),
        ("password_field", fields.password_field.as_str()),
        ("username", sec_fields.username.as_str()),
        ("password", sec_fields.password.as_str()),
    ];
    for (name, value) in checked {
        if value.contains('\0') {
            return Err(InvalidLogin::illegal(format!("`{name}` contains Nul")));
        }
        let multiline_ok = name == "username" || name == "password";
        if !multiline_ok && (value.contains('\n') || value.contains('\r')) {
            return Err(InvalidLogin::illegal(format!("`{name}` contains newline")));
        }
    }

    if fields.username_field == "." {
        return Err(InvalidLogin::illegal("`username_field` is a period"));
    }

    if let Some(origin) = fixup_origin(&fields.origin, "origin")? {
        fixed_or_fail!(InvalidLogin::illegal("origin is not normalized")).origin = origin;
    }

    match fixed.as_ref().unwrap_or(fields).form_action_origin.clone() {
        None => {
            if !fields.username_field.is_empty() {
                fixed_or_fail!(InvalidLogin::illegal(
                    "username_field must be empty when form_action_origin is null"
                ))
                .username_field
                .clear();
            }
            if !fields.password_field.is_empty() {
                fixed_or_fail!(InvalidLogin::illegal(
                    "password_field must be empty when form_action_origin is null"
                ))
                .password_field
                .clear();
            }
        }
        // "." is what some legacy clients wrote for "same as origin"; only
        // rewritten when repairing.
        Some(action) if action == "." => {
            if fixup {
                fixed.get_or_insert_with(|| fields.clone()).form_action_origin = Some(String::new());
            }
        }
        Some(action) if action.is_empty() || action == "javascript:" => {}
        Some(action) => {
            if let Some(normalized) = fixup_origin(&action, "form_action_origin")? {
                fixed_or_fail!(InvalidLogin::illegal("form_action_origin is not normalized"))
                    .form_action_origin = Some(normalized);
            }
        }
    }

    Ok(fixed)
}
