//! Store events.
//!
//! The store does not call back into the host. Instead every notable
//! change is appended to an [`EventOutbox`] as a typed [`StoreEvent`], and the
//! host drains the outbox whenever it likes (after a sync, on a timer, on
//! app resume).

use crate::{Guid, now_millis};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new, time-ordered event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Why the encryption key had to be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRegenerationReason {
    /// No key was available even though encrypted data exists.
    Lost,
    /// The key does not decrypt the stored data.
    Corrupt,
    /// Anything else.
    Other,
}

impl fmt::Display for KeyRegenerationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lost => "lost",
            Self::Corrupt => "corrupt",
            Self::Other => "other",
        })
    }
}

/// Something the host may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// A login was added locally.
    Added { id: Guid },
    /// A login was edited locally.
    Updated { id: Guid },
    /// A login was deleted locally.
    Deleted { id: Guid },
    /// All logins were wiped (tombstoned or dropped).
    Wiped { local_only: bool },
    /// An incoming record was applied without conflict.
    Applied { id: Guid },
    /// An incoming record conflicted with local state and was merged.
    Reconciled { id: Guid },
    /// A stored record could not be decrypted and was dropped.
    Undecryptable { id: Guid, mirror: bool },
    /// The sync server rejected our credentials.
    AuthProblem { reason: String },
    /// The encryption key was replaced and encrypted data discarded.
    KeyRegenerated { reason: KeyRegenerationReason },
    /// A sync pass finished, successfully or not.
    SyncFinished { succeeded: bool },
}

/// An event with its id and creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub event: StoreEvent,
}

impl Event {
    #[must_use]
    pub fn new(event: StoreEvent) -> Self {
        Self {
            id: EventId::new(),
            timestamp: now_millis(),
            event,
        }
    }

    /// Serializes the event to JSON for hosts that consume it over a
    /// serialization boundary.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Queue of events waiting for the host to pick them up.
///
/// Bounded: once `capacity` events are queued, the oldest are dropped.
#[derive(Debug)]
pub struct EventOutbox {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
}

/// Default number of events retained when nobody drains the outbox.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

impl Default for EventOutbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_OUTBOX_CAPACITY)
    }
}

impl EventOutbox {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    // Plain data; keep using it after poisoning.
    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: StoreEvent) {
        let mut queue = self.queue();
        while queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(Event::new(event));
    }

    /// Removes and returns every queued event, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<Event> {
        self.queue().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}
