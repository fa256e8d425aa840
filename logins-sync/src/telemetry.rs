//! Structured sync counts.
//!
//! The engine only produces these numbers; formatting and submitting pings
//! is up to the host through a [`TelemetrySink`].

use logins_store::KeyEventSink;
use logins_types::{KeyRegenerationReason, now_millis};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Counts for records downloaded in one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineIncoming {
    pub applied: u32,
    pub failed: u32,
    pub reconciled: u32,
}

impl EngineIncoming {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn accumulate(&mut self, other: &EngineIncoming) {
        self.applied += other.applied;
        self.failed += other.failed;
        self.reconciled += other.reconciled;
    }
}

/// Counts for one upload batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOutgoing {
    pub sent: u32,
    pub failed: u32,
}

/// Why a sync pass failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum FailureReason {
    Auth,
    Http { code: u16 },
    Unexpected { message: String },
    /// The host shut the pass down. Not a failure for reporting purposes.
    Shutdown,
    Other { message: String },
}

impl FailureReason {
    /// Whether this reason counts toward failure totals.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }
}

/// Everything one sync pass reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTelemetryPing {
    pub engine: String,
    /// Start of the pass, milliseconds since the epoch.
    pub when: i64,
    pub took_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming: Option<EngineIncoming>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outgoing: Vec<EngineOutgoing>,
    /// Local rows dropped because they no longer decrypt.
    pub local_deleted: u32,
    /// Mirror rows dropped because they no longer decrypt.
    pub mirror_deleted: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl SyncTelemetryPing {
    #[must_use]
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            when: now_millis(),
            took_ms: 0,
            incoming: None,
            outgoing: Vec::new(),
            local_deleted: 0,
            mirror_deleted: 0,
            failure_reason: None,
        }
    }

    pub fn incoming(&mut self, incoming: EngineIncoming) {
        if incoming.is_empty() {
            return;
        }
        self.incoming
            .get_or_insert_with(EngineIncoming::default)
            .accumulate(&incoming);
    }

    pub fn outgoing(&mut self, batch: EngineOutgoing) {
        self.outgoing.push(batch);
    }

    #[must_use]
    pub fn uploaded(&self) -> u32 {
        self.outgoing.iter().map(|o| o.sent).sum()
    }

    #[must_use]
    pub fn failed_to_upload(&self) -> u32 {
        self.outgoing.iter().map(|o| o.failed).sum()
    }

    #[must_use]
    pub fn outgoing_batches(&self) -> usize {
        self.outgoing.len()
    }

    /// Whether the pass failed in a way that counts.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.failure_reason
            .as_ref()
            .is_some_and(FailureReason::counts_as_failure)
    }
}

/// Receives a ping at the end of every sync pass.
pub trait TelemetrySink: Send + Sync {
    fn record_sync(&self, ping: &SyncTelemetryPing);
}

/// Running totals across passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryTotals {
    pub syncs: u32,
    pub failures: u32,
    pub applied: u32,
    pub failed_to_apply: u32,
    pub reconciled: u32,
    pub uploaded: u32,
    pub failed_to_upload: u32,
    pub outgoing_batches: u32,
    pub local_deleted: u32,
    pub mirror_deleted: u32,
    pub key_lost: u32,
    pub key_corrupt: u32,
    pub key_other: u32,
    pub last_failure: Option<FailureReason>,
}

/// An in-memory [`TelemetrySink`] that adds pings up. Also counts key
/// regenerations when installed as the store's [`KeyEventSink`].
#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    totals: Mutex<TelemetryTotals>,
}

impl TelemetryAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Plain counters; keep using them after a poisoning panic.
    fn totals_mut(&self) -> std::sync::MutexGuard<'_, TelemetryTotals> {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn totals(&self) -> TelemetryTotals {
        self.totals_mut().clone()
    }

    /// Returns the totals and starts over.
    #[must_use]
    pub fn take(&self) -> TelemetryTotals {
        std::mem::take(&mut *self.totals_mut())
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl TelemetrySink for TelemetryAggregator {
    fn record_sync(&self, ping: &SyncTelemetryPing) {
        let mut totals = self.totals_mut();
        totals.syncs += 1;
        if ping.failed() {
            totals.failures += 1;
            totals.last_failure = ping.failure_reason.clone();
        }
        if let Some(incoming) = &ping.incoming {
            totals.applied += incoming.applied;
            totals.failed_to_apply += incoming.failed;
            totals.reconciled += incoming.reconciled;
        }
        totals.uploaded += ping.uploaded();
        totals.failed_to_upload += ping.failed_to_upload();
        totals.outgoing_batches += saturating_u32(ping.outgoing_batches());
        totals.local_deleted += ping.local_deleted;
        totals.mirror_deleted += ping.mirror_deleted;
    }
}

impl KeyEventSink for TelemetryAggregator {
    fn key_regenerated(&self, reason: KeyRegenerationReason) {
        let mut totals = self.totals_mut();
        match reason {
            KeyRegenerationReason::Lost => totals.key_lost += 1,
            KeyRegenerationReason::Corrupt => totals.key_corrupt += 1,
            KeyRegenerationReason::Other => totals.key_other += 1,
        }
    }
}
