//! Record identifiers.
//!
//! Login ids are short random base64url strings, the same shape the sync
//! server assigns. Ids coming from older clients may be arbitrary strings, so
//! [`Guid::new`] accepts anything and [`Guid::is_valid_for_sync_server`] is
//! checked only where the server cares.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of random bytes behind a generated id (encodes to 12 characters).
const RANDOM_BYTES: usize = 9;

/// Longest id the sync server accepts.
const MAX_SERVER_LEN: usize = 64;

/// Unique identifier for a login record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Wraps an existing id without validating it.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh 12-character base64url id.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; RANDOM_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the server would accept this id: 1 to 64 characters drawn
    /// from the base64url alphabet.
    #[must_use]
    pub fn is_valid_for_sync_server(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= MAX_SERVER_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Guid {
    type Err = crate::Error;

    /// Parses an id, rejecting anything the sync server would refuse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let guid = Self::new(s);
        if guid.is_valid_for_sync_server() {
            Ok(guid)
        } else {
            Err(crate::Error::InvalidGuid(s.to_string()))
        }
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Guid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Guid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Guid {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Guid {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
