//! Drives one sync pass end to end.
//!
//! A pass moves through [`SyncPhase`]s: fetch what changed on the server,
//! merge it record by record, upload local changes in batches, then advance
//! the checkpoint. Storage work runs on tokio's blocking pool; network work
//! goes through the [`SyncClient`] and [`TokenProvider`] collaborators.
//!
//! Only one pass runs at a time per coordinator. A second call to
//! [`SyncCoordinator::sync`] waits for the first to finish.

use crate::auth::{AuthInfo, TokenProvider};
use crate::engine::{ENGINE_NAME, LoginsSyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::merge::TieBreak;
use crate::telemetry::{EngineOutgoing, SyncTelemetryPing, TelemetrySink};
use crate::transport::{ServerChanges, SyncClient};
use logins_store::{InterruptScope, LoginStore};
use logins_types::{ServerTimestamp, StoreEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default number of records per upload batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Configuration for the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum records per upload batch.
    pub batch_size: usize,
    /// Who wins a merge collision with equal timestamps.
    pub tie_break: TieBreak,
    /// Server collection the logins live in.
    pub collection: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tie_break: TieBreak::default(),
            collection: "passwords".to_string(),
        }
    }
}

/// Where a sync pass is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Fetching,
    Merging,
    Uploading,
    /// The last pass ended in a hard error. The next pass starts over.
    Failed,
}

/// Runs sync passes for one store.
pub struct SyncCoordinator {
    engine: LoginsSyncEngine,
    tokens: Arc<dyn TokenProvider>,
    client: Arc<dyn SyncClient>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    config: SyncConfig,
    phase: RwLock<SyncPhase>,
    running: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LoginStore>,
        tokens: Arc<dyn TokenProvider>,
        client: Arc<dyn SyncClient>,
        config: SyncConfig,
    ) -> Self {
        Self {
            engine: LoginsSyncEngine::new(store, config.tie_break),
            tokens,
            client,
            telemetry: None,
            config,
            phase: RwLock::new(SyncPhase::Idle),
            running: Mutex::new(()),
        }
    }

    /// Sends a ping to `sink` at the end of every pass.
    #[must_use]
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn engine(&self) -> &LoginsSyncEngine {
        &self.engine
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn phase(&self) -> SyncPhase {
        *self.phase.read().await
    }

    async fn set_phase(&self, phase: SyncPhase) {
        debug!(?phase, "sync phase");
        *self.phase.write().await = phase;
    }

    /// Interrupts the pass in progress, if any. It ends with
    /// [`SyncError::Interrupted`] at the next record or batch boundary;
    /// everything committed so far stays committed.
    pub fn interrupt(&self) {
        info!("interrupting sync");
        self.engine.store().interrupt_handle().interrupt();
    }

    /// Runs one sync pass.
    ///
    /// The telemetry sink sees the ping whether or not the pass succeeds.
    /// Auth failures also queue a [`StoreEvent::AuthProblem`] and leave local
    /// data untouched.
    pub async fn sync(&self) -> SyncResult<SyncTelemetryPing> {
        let _running = self.running.lock().await;
        let started = Instant::now();
        let scope = self.engine.store().begin_interrupt_scope();
        let mut ping = SyncTelemetryPing::new(ENGINE_NAME);
        info!(collection = %self.config.collection, "starting sync");

        let result = self.run(&scope, &mut ping).await;
        ping.took_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outbox = self.engine.store().outbox();
        match &result {
            Ok(()) => {
                self.set_phase(SyncPhase::Idle).await;
                info!(
                    took_ms = ping.took_ms,
                    uploaded = ping.uploaded(),
                    "sync finished"
                );
            }
            Err(SyncError::Interrupted) => {
                self.set_phase(SyncPhase::Idle).await;
                info!("sync interrupted");
            }
            Err(e) => {
                if let SyncError::AuthInvalid(reason) = e {
                    warn!("sync credentials rejected");
                    outbox.push(StoreEvent::AuthProblem {
                        reason: reason.clone(),
                    });
                } else {
                    warn!("sync failed: {e}");
                }
                self.set_phase(SyncPhase::Failed).await;
            }
        }
        if let Err(e) = &result {
            ping.failure_reason = Some(e.failure_reason());
        }
        outbox.push(StoreEvent::SyncFinished {
            succeeded: result.is_ok(),
        });
        if let Some(sink) = &self.telemetry {
            sink.record_sync(&ping);
        }
        result.map(|()| ping)
    }

    async fn run(&self, scope: &InterruptScope, ping: &mut SyncTelemetryPing) -> SyncResult<()> {
        self.set_phase(SyncPhase::Fetching).await;
        let auth = self.tokens.auth_info().await?;
        let changes = self.fetch(&auth, scope).await?;
        scope.err_if_interrupted()?;

        self.set_phase(SyncPhase::Merging).await;
        let fetched_at = changes.timestamp;
        let summary = {
            let scope = scope.clone();
            self.blocking(move |engine| {
                engine.apply_incoming(changes.records, fetched_at, &scope)
            })
            .await?
        };
        ping.incoming(summary.incoming);
        ping.local_deleted += summary.local_deleted;
        ping.mirror_deleted += summary.mirror_deleted;

        self.set_phase(SyncPhase::Uploading).await;
        let checkpoint = self
            .upload(&auth, scope, fetched_at, ping)
            .await?
            .unwrap_or(fetched_at);
        let checkpoint = checkpoint.max(fetched_at);
        self.blocking(move |engine| engine.set_last_sync(checkpoint))
            .await?;
        debug!(%checkpoint, "advanced sync checkpoint");
        Ok(())
    }

    /// Fetches changes since the checkpoint. When the server's sync ids no
    /// longer match ours, local sync state is reset and everything is
    /// fetched again.
    async fn fetch(&self, auth: &AuthInfo, scope: &InterruptScope) -> SyncResult<ServerChanges> {
        let collection = &self.config.collection;
        let since = self.blocking(|engine| engine.last_sync()).await?;
        debug!(%since, "fetching changes");
        let changes = self.client.fetch_changes(auth, collection, since).await?;
        scope.err_if_interrupted()?;

        let server_ids = changes.sync_ids.clone();
        let was_reset = self
            .blocking(move |engine| engine.ensure_sync_ids(&server_ids))
            .await?;
        if was_reset && since > ServerTimestamp(0) {
            info!("refetching collection after sync id change");
            return self
                .client
                .fetch_changes(auth, collection, ServerTimestamp(0))
                .await;
        }
        Ok(changes)
    }

    /// Uploads local changes in batches. Returns the server time of the last
    /// batch when every record was accepted.
    ///
    /// Each batch requires the collection to be unchanged since the previous
    /// one (the first since `fetched_at`). If another client wrote in
    /// between, the pass fails and the next one fetches that write.
    async fn upload(
        &self,
        auth: &AuthInfo,
        scope: &InterruptScope,
        fetched_at: ServerTimestamp,
        ping: &mut SyncTelemetryPing,
    ) -> SyncResult<Option<ServerTimestamp>> {
        let outgoing = {
            let scope = scope.clone();
            self.blocking(move |engine| engine.fetch_outgoing(&scope))
                .await?
        };
        ping.local_deleted += outgoing.local_deleted;
        if outgoing.records.is_empty() {
            return Ok(None);
        }

        let mut unmodified_since = fetched_at;
        let mut last_upload = None;
        let mut all_accepted = true;
        for batch in outgoing.records.chunks(self.config.batch_size.max(1)) {
            scope.err_if_interrupted()?;
            let result = self
                .client
                .upload(auth, &self.config.collection, batch, unmodified_since)
                .await
                .inspect_err(|e| {
                    if e.is_precondition_failed() {
                        info!("collection changed during upload, retrying next sync");
                    }
                })?;
            ping.outgoing(EngineOutgoing {
                sent: u32::try_from(result.success.len()).unwrap_or(u32::MAX),
                failed: u32::try_from(result.failed.len()).unwrap_or(u32::MAX),
            });
            if !result.failed.is_empty() {
                warn!(count = result.failed.len(), "server rejected records");
                all_accepted = false;
            }
            if !result.success.is_empty() {
                let (ids, modified) = (result.success, result.timestamp);
                let scope = scope.clone();
                self.blocking(move |engine| engine.mark_uploaded(&ids, modified, &scope))
                    .await?;
            }
            unmodified_since = result.timestamp;
            last_upload = Some(result.timestamp);
        }
        Ok(last_upload.filter(|_| all_accepted))
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&LoginsSyncEngine) -> SyncResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || f(&engine)).await?
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
