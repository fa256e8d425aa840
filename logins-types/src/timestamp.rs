//! Millisecond timestamps.
//!
//! Login metadata (`timeCreated`, `timeLastUsed`, `timePasswordChanged`) and
//! the sync server's modification times are both plain milliseconds since
//! the Unix epoch. The server flavour gets a newtype so the two are not mixed
//! up by accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as 0 rather than failing.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// A modification time assigned by the sync server, in milliseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ServerTimestamp(pub i64);

impl ServerTimestamp {
    /// Creates a timestamp from milliseconds. Negative inputs clamp to 0.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        if millis < 0 { Self(0) } else { Self(millis) }
    }

    /// The current time as the server would stamp it.
    #[must_use]
    pub fn now() -> Self {
        Self(now_millis())
    }

    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// How long ago `earlier` was relative to `self`, or `None` when
    /// `earlier` is in the future.
    #[must_use]
    pub fn duration_since(self, earlier: ServerTimestamp) -> Option<Duration> {
        let delta = self.0.checked_sub(earlier.0)?;
        u64::try_from(delta).ok().map(Duration::from_millis)
    }
}

impl fmt::Display for ServerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
