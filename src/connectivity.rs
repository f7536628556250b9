//! Reachability state machine: `Unknown -> {Offline, Online}`, re-probed on an interval.

use crate::record_store::LocalRecordStore;
use crate::sync::SyncTrigger;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Unknown,
    Offline,
    Online,
}

/// One reachability check. An `Err` is treated exactly like `Ok(false)`.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> Result<bool>;
}

/// HEAD request against the backend; any non-5xx answer counts as reachable.
pub struct HttpProbe {
    http_client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        url::Url::parse(&url).map_err(|e| anyhow!("Invalid probe URL {}: {}", url, e))?;
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> Result<bool> {
        let response = self
            .http_client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| anyhow!("Probe of {} failed: {}", self.url, e))?;
        Ok(!response.status().is_server_error())
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub probe_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            debounce: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    store: Arc<LocalRecordStore>,
    settings: MonitorSettings,
    state_tx: watch::Sender<ConnectivityState>,
    pending_count: AtomicUsize,
    // Held for the duration of a probe; a second caller gets the current state instead.
    probe_lock: tokio::sync::Mutex<()>,
    // Bumped on every state change. A debounced trigger only fires if it is unchanged.
    transition_epoch: Arc<AtomicU64>,
    // Set while a `BacklogQueued` trigger is waiting out its debounce.
    backlog_sync_scheduled: Arc<AtomicBool>,
    sync_tx: Option<mpsc::Sender<SyncTrigger>>,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("pending_count", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        store: Arc<LocalRecordStore>,
        settings: MonitorSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::Unknown);
        Self {
            probe,
            store,
            settings,
            state_tx,
            pending_count: AtomicUsize::new(0),
            probe_lock: tokio::sync::Mutex::new(()),
            transition_epoch: Arc::new(AtomicU64::new(0)),
            backlog_sync_scheduled: Arc::new(AtomicBool::new(false)),
            sync_tx: None,
        }
    }

    /// Where debounced sync triggers are delivered.
    pub fn with_sync_trigger(mut self, sync_tx: mpsc::Sender<SyncTrigger>) -> Self {
        self.sync_tx = Some(sync_tx);
        self
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Online
    }

    /// Pending catches as of the last Online confirmation; 0 while not Online.
    pub fn pending_count(&self) -> usize {
        self.pending_count.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    /// Re-reads the pending count if we are Online. Called after local appends.
    ///
    /// A backlog found while Online gets a debounced `BacklogQueued` trigger; appends inside
    /// one debounce window share a single trigger.
    pub fn refresh_pending_count(&self) {
        if !self.is_online() {
            return;
        }
        let pending = self.store.pending_count();
        self.pending_count.store(pending, Ordering::SeqCst);

        if pending > 0
            && self
                .backlog_sync_scheduled
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let epoch = self.transition_epoch.load(Ordering::SeqCst);
            self.schedule_sync(epoch, pending, SyncTrigger::BacklogQueued);
        }
    }

    /// Runs one reachability check and applies the result. Never fails.
    ///
    /// If another probe is already running this returns the current state without probing.
    pub async fn probe(&self) -> ConnectivityState {
        let Ok(_guard) = self.probe_lock.try_lock() else {
            tracing::trace!("Probe already running, coalescing");
            return self.state();
        };

        let reachable =
            match tokio::time::timeout(self.settings.probe_timeout, self.probe.check()).await {
                Ok(Ok(reachable)) => reachable,
                Ok(Err(e)) => {
                    tracing::debug!("Reachability check failed: {:#}", e);
                    false
                }
                Err(_) => {
                    tracing::debug!(
                        "Reachability check timed out after {:?}",
                        self.settings.probe_timeout
                    );
                    false
                }
            };

        let next = if reachable {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };

        let pending = if next == ConnectivityState::Online {
            self.store.pending_count()
        } else {
            0
        };
        self.pending_count.store(pending, Ordering::SeqCst);

        let previous = self.state_tx.send_replace(next);
        if previous != next {
            let epoch = self.transition_epoch.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::info!("Connectivity changed: {:?} -> {:?}", previous, next);

            // Start-up resolution from Unknown is handled by the caller with `AppStart`.
            if previous == ConnectivityState::Offline
                && next == ConnectivityState::Online
                && pending > 0
            {
                self.schedule_sync(epoch, pending, SyncTrigger::ConnectivityRestored);
            }
        }

        next
    }

    fn schedule_sync(&self, epoch: u64, pending: usize, trigger: SyncTrigger) {
        let backlog_sync_scheduled = Arc::clone(&self.backlog_sync_scheduled);
        let Some(sync_tx) = self.sync_tx.clone() else {
            backlog_sync_scheduled.store(false, Ordering::SeqCst);
            return;
        };
        let transition_epoch = Arc::clone(&self.transition_epoch);
        let state_rx = self.state_tx.subscribe();
        let debounce = self.settings.debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if trigger == SyncTrigger::BacklogQueued {
                backlog_sync_scheduled.store(false, Ordering::SeqCst);
            }

            let still_online = *state_rx.borrow() == ConnectivityState::Online;
            if transition_epoch.load(Ordering::SeqCst) != epoch || !still_online {
                tracing::debug!("Connectivity flapped during debounce, not syncing");
                return;
            }

            tracing::info!("{} pending catches, requesting sync ({:?})", pending, trigger);
            if sync_tx.send(trigger).await.is_err() {
                tracing::debug!("Sync worker gone, dropping trigger");
            }
        });
    }

    /// Starts the polling loop. The first probe runs immediately.
    pub fn spawn(self: Arc<Self>) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let poll_interval = self.settings.poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        self.probe().await;
                    }
                }
            }
            tracing::debug!("Connectivity monitor stopped");
        });

        MonitorHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}

/// Handle to a running polling loop. Dropping it also stops the loop.
pub struct MonitorHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Connectivity monitor task ended abnormally: {}", e);
        }
    }
}
