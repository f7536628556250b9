use crate::db_client::CatchBackend;
use crate::models::{Catch, Location, SyncResult};
use crate::record_store::LocalRecordStore;
use crate::refresh::BackgroundRefresh;
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_INSERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a sync pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRestored,
    /// A catch was queued while already Online.
    BacklogQueued,
    Manual,
    AppStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
}

#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_result: Option<SyncResult>,
}

/// Clears the syncing flag however the pass ends, including panics and cancellation.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sole driver of pending catches to the backend. Only one pass runs at a time.
pub struct SyncCoordinator {
    store: Arc<LocalRecordStore>,
    backend: Arc<dyn CatchBackend>,
    refresher: Option<Arc<dyn BackgroundRefresh>>,
    insert_timeout: Duration,
    syncing: AtomicBool,
    status: Mutex<SyncStatus>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("phase", &self.phase())
            .field("insert_timeout", &self.insert_timeout)
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    pub fn new(store: Arc<LocalRecordStore>, backend: Arc<dyn CatchBackend>) -> Self {
        Self {
            store,
            backend,
            refresher: None,
            insert_timeout: DEFAULT_INSERT_TIMEOUT,
            syncing: AtomicBool::new(false),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub fn with_insert_timeout(mut self, insert_timeout: Duration) -> Self {
        self.insert_timeout = insert_timeout;
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn BackgroundRefresh>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn phase(&self) -> SyncPhase {
        if self.syncing.load(Ordering::SeqCst) {
            SyncPhase::Syncing
        } else {
            SyncPhase::Idle
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    /// Pushes every pending catch, oldest first, and compacts the store afterwards.
    ///
    /// Returns at once with "Sync already in progress" if another pass is running.
    pub async fn run_sync(&self) -> SyncResult {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("Sync already in progress, skipping");
            return SyncResult::already_in_progress();
        }
        let _guard = SyncingGuard(&self.syncing);

        let mut result = SyncResult::empty();
        let pending = self.store.list_pending();
        if let Some(warning) = &pending.warning {
            result.errors.push(format!("Sync failed: {}", warning));
        }

        tracing::info!("Starting sync of {} pending catches", pending.len());

        for record in &pending.catches {
            let wire = Catch::from(record);
            let outcome =
                match tokio::time::timeout(self.insert_timeout, self.backend.insert_catch(&wire))
                    .await
                {
                    Ok(Ok(())) => self
                        .store
                        .mark_synced(&record.id_local)
                        .context("Uploaded but failed to mark as synced"),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(anyhow!("Insert timed out after {:?}", self.insert_timeout)),
                };

            match outcome {
                Ok(()) => {
                    tracing::debug!("Synced catch {}", record.id_local);
                    result.record_success();
                }
                Err(e) => {
                    let cause = format!("{:#}", e);
                    tracing::warn!("Failed to sync catch {}: {}", record.id_local, cause);
                    if let Err(e) = self.store.record_failure(&record.id_local, &cause) {
                        tracing::warn!(
                            "Could not record failure for {}: {:#}",
                            record.id_local,
                            e
                        );
                    }
                    result.record_failure(&record.id_local, cause);
                }
            }
        }

        match self.store.evict_synced() {
            Ok(evicted) => tracing::debug!("Evicted {} synced catches", evicted),
            Err(e) => tracing::warn!("Failed to evict synced catches: {:#}", e),
        }

        let result = result.finish();
        tracing::info!(
            "Sync finished: {} synced, {} failed",
            result.synced_count,
            result.failed_count
        );

        if let Ok(mut status) = self.status.lock() {
            status.last_sync_at = Some(Utc::now());
            status.last_result = Some(result.clone());
        }

        result
    }

    /// Fires cache warming in the background, then runs a normal pass.
    ///
    /// Warming is never awaited and has no effect on the returned result.
    pub async fn run_full_sync(&self, location: Option<Location>) -> SyncResult {
        if let Some(refresher) = &self.refresher {
            refresher.spawn_refresh(location);
        }
        self.run_sync().await
    }
}

/// Runs a pass for every trigger received until all senders are dropped.
pub fn spawn_sync_worker(
    coordinator: Arc<SyncCoordinator>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(trigger) = triggers.recv().await {
            tracing::debug!("Sync requested: {:?}", trigger);
            let result = coordinator.run_sync().await;
            if !result.success {
                tracing::warn!("Sync after {:?} incomplete: {:?}", trigger, result.errors);
            }
        }
        tracing::debug!("Sync worker stopped");
    })
}
