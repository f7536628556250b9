use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::{CacheLookup, CacheStore};
use crate::config::{AppConfig, SyncSettings};
use crate::connectivity::{ConnectivityMonitor, ConnectivityState, HttpProbe, MonitorHandle, ReachabilityProbe};
use crate::db_client::{CatchBackend, CatchDbClient, SpeciesSource};
use crate::models::{Catch, CatchInput, FishSpecies, Location, SyncResult, WeatherReport};
use crate::photos::PhotoVault;
use crate::record_store::{LocalRecordStore, PendingCatches};
use crate::refresh::CacheWarmer;
use crate::storage::{NativeDbStorage, StorageProvider};
use crate::sync::{spawn_sync_worker, SyncCoordinator, SyncPhase, SyncTrigger};
use crate::weather::{OpenWeatherClient, WeatherSource};

pub const SAVED_LOCALLY_MESSAGE: &str = "saved locally, will sync when back online";

const TRIGGER_QUEUE: usize = 8;

// ===== OUTCOMES =====

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// Inserted straight into the backend; nothing was queued.
    Uploaded,
    /// Queued in the local record store.
    SavedLocally { id_local: String, message: String },
}

impl CaptureOutcome {
    pub fn saved_locally(id_local: String) -> Self {
        Self::SavedLocally {
            id_local,
            message: SAVED_LOCALLY_MESSAGE.to_string(),
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::SavedLocally { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub connectivity: ConnectivityState,
    /// As reported by the monitor; 0 unless Online.
    pub pending_count: usize,
    /// Read straight from the store, whatever the connectivity.
    pub queued_count: usize,
    pub phase: SyncPhase,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_result: Option<SyncResult>,
}

// ===== BUILDER =====

pub struct CatchLogClientBuilder {
    storage: Arc<dyn StorageProvider>,
    backend: Arc<dyn CatchBackend>,
    probe: Arc<dyn ReachabilityProbe>,
    species_source: Option<Arc<dyn SpeciesSource>>,
    weather_source: Option<Arc<dyn WeatherSource>>,
    photo_vault: Option<PhotoVault>,
    settings: SyncSettings,
}

impl CatchLogClientBuilder {
    pub fn species_source(mut self, source: Arc<dyn SpeciesSource>) -> Self {
        self.species_source = Some(source);
        self
    }

    pub fn weather_source(mut self, source: Arc<dyn WeatherSource>) -> Self {
        self.weather_source = Some(source);
        self
    }

    pub fn photo_vault(mut self, vault: PhotoVault) -> Self {
        self.photo_vault = Some(vault);
        self
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wires every component together and drops expired cache entries.
    pub fn build(self) -> CatchLogClient {
        let store = Arc::new(LocalRecordStore::new(self.storage.clone()));
        let cache = Arc::new(CacheStore::with_threshold(
            self.storage.clone(),
            self.settings.spatial_threshold_km,
        ));

        let mut warmer = CacheWarmer::new(cache.clone());
        if let Some(source) = self.species_source {
            warmer = warmer.with_species_source(source);
        }
        if let Some(source) = self.weather_source {
            warmer = warmer.with_weather_source(source);
        }

        let coordinator = Arc::new(
            SyncCoordinator::new(store.clone(), self.backend.clone())
                .with_insert_timeout(self.settings.request_timeout)
                .with_refresher(Arc::new(Arc::new(warmer))),
        );

        let (sync_tx, sync_rx) = mpsc::channel(TRIGGER_QUEUE);
        let monitor = Arc::new(
            ConnectivityMonitor::new(self.probe, store.clone(), self.settings.monitor_settings())
                .with_sync_trigger(sync_tx.clone()),
        );

        if let Err(e) = cache.purge_expired() {
            tracing::warn!("Failed to purge expired cache entries: {:#}", e);
        }

        CatchLogClient {
            store,
            cache,
            monitor,
            coordinator,
            backend: self.backend,
            photo_vault: self.photo_vault,
            settings: self.settings,
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
        }
    }
}

// ===== CLIENT =====

/// Owns every component and hands them out explicitly; there is no global state.
pub struct CatchLogClient {
    store: Arc<LocalRecordStore>,
    cache: Arc<CacheStore>,
    monitor: Arc<ConnectivityMonitor>,
    coordinator: Arc<SyncCoordinator>,
    backend: Arc<dyn CatchBackend>,
    photo_vault: Option<PhotoVault>,
    settings: SyncSettings,
    sync_tx: mpsc::Sender<SyncTrigger>,
    // Taken by `start`; the worker owns it from then on.
    sync_rx: Mutex<Option<mpsc::Receiver<SyncTrigger>>>,
}

impl std::fmt::Debug for CatchLogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatchLogClient")
            .field("monitor", &self.monitor)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl CatchLogClient {
    pub fn builder(
        storage: Arc<dyn StorageProvider>,
        backend: Arc<dyn CatchBackend>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> CatchLogClientBuilder {
        CatchLogClientBuilder {
            storage,
            backend,
            probe,
            species_source: None,
            weather_source: None,
            photo_vault: None,
            settings: SyncSettings::default(),
        }
    }

    /// Production wiring: native_db file, PostgREST backend, HTTP probe, optional weather.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let database = config.require_database()?;
        let probe_url = config
            .probe_url
            .clone()
            .unwrap_or_else(|| database.get_rest_url().to_string());

        let storage = Arc::new(NativeDbStorage::open(config.database_path())?);
        let db_client = Arc::new(CatchDbClient::new(database.clone()));
        let probe = Arc::new(HttpProbe::new(probe_url, config.settings.request_timeout)?);

        let mut builder = Self::builder(storage, db_client.clone(), probe)
            .species_source(db_client)
            .photo_vault(PhotoVault::new(&config.data_dir))
            .settings(config.settings.clone());

        if let Some(api_key) = &config.weather_api_key {
            builder = builder.weather_source(Arc::new(OpenWeatherClient::new(
                api_key.clone(),
                config.settings.request_timeout,
            )?));
        }

        Ok(builder.build())
    }

    pub fn store(&self) -> &Arc<LocalRecordStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Resolves connectivity, syncs if there is a backlog, then starts the
    /// polling loop and the trigger worker.
    pub async fn start(&self) -> Result<ClientRuntime> {
        let sync_rx = self
            .sync_rx
            .lock()
            .map_err(|_| anyhow!("Client trigger lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("Client already started"))?;

        let worker = spawn_sync_worker(self.coordinator.clone(), sync_rx);

        let state = self.monitor.probe().await;
        if state == ConnectivityState::Online && self.monitor.pending_count() > 0 {
            if let Err(e) = self.sync_tx.send(SyncTrigger::AppStart).await {
                tracing::warn!("Failed to request start-up sync: {}", e);
            }
        }

        let monitor = self.monitor.clone().spawn();
        tracing::info!("Catch log client started ({:?})", state);

        Ok(ClientRuntime { monitor, worker })
    }

    /// Uploads directly when Online; otherwise, or if the backend rejects it, queues locally.
    ///
    /// A direct upload that times out is returned as an error and not queued.
    pub async fn record_catch(&self, input: CatchInput) -> Result<CaptureOutcome> {
        if input.species.trim().is_empty() {
            return Err(anyhow!("Catch species is required"));
        }

        if self.monitor.is_online() {
            let row = Catch::from_input(&input, Utc::now());
            match tokio::time::timeout(self.settings.request_timeout, self.backend.insert_catch(&row))
                .await
            {
                Ok(Ok(())) => {
                    tracing::info!("Uploaded {} catch directly", row.species);
                    return Ok(CaptureOutcome::Uploaded);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Direct upload failed, saving locally: {:#}", e);
                }
                Err(_) => {
                    // The row may already be committed, so queueing it could duplicate it.
                    tracing::warn!(
                        "Direct upload timed out after {:?}, outcome unknown",
                        self.settings.request_timeout
                    );
                    return Err(anyhow!(
                        "Upload of {} catch timed out after {:?}; it may already be saved remotely",
                        row.species,
                        self.settings.request_timeout
                    ));
                }
            }
        }

        let id_local = self.store.append(input)?;
        self.monitor.refresh_pending_count();
        Ok(CaptureOutcome::saved_locally(id_local))
    }

    /// Copies a photo into the vault and returns the stored path for `CatchInput::with_photo`.
    pub async fn save_photo(&self, source: impl AsRef<Path>, catch_tag: &str) -> Result<String> {
        let vault = self
            .photo_vault
            .as_ref()
            .ok_or_else(|| anyhow!("No photo directory configured"))?;
        let stored = vault.store_photo(source, catch_tag).await?;
        Ok(stored.to_string_lossy().into_owned())
    }

    pub async fn probe(&self) -> ConnectivityState {
        self.monitor.probe().await
    }

    pub async fn sync_now(&self) -> SyncResult {
        self.coordinator.run_sync().await
    }

    pub async fn full_sync(&self, location: Option<Location>) -> SyncResult {
        self.coordinator.run_full_sync(location).await
    }

    /// Asks the running worker for a pass instead of running one inline.
    pub async fn request_sync(&self) -> Result<()> {
        self.sync_tx
            .send(SyncTrigger::Manual)
            .await
            .map_err(|_| anyhow!("Sync worker is not running"))
    }

    pub fn pending(&self) -> PendingCatches {
        self.store.list_pending()
    }

    pub fn status(&self) -> ClientStatus {
        let sync = self.coordinator.status();
        ClientStatus {
            connectivity: self.monitor.state(),
            pending_count: self.monitor.pending_count(),
            queued_count: self.store.pending_count(),
            phase: self.coordinator.phase(),
            last_sync_at: sync.last_sync_at,
            last_result: sync.last_result,
        }
    }

    pub fn cached_weather(&self, location: &Location) -> CacheLookup<WeatherReport> {
        self.cache.get_weather(location)
    }

    pub fn cached_species(&self) -> CacheLookup<Vec<FishSpecies>> {
        self.cache.get_species()
    }

    pub fn purge_expired_cache(&self) -> Result<usize> {
        self.cache.purge_expired()
    }
}

/// Background tasks started by [`CatchLogClient::start`].
pub struct ClientRuntime {
    monitor: MonitorHandle,
    worker: JoinHandle<()>,
}

impl ClientRuntime {
    pub async fn shutdown(self) {
        self.monitor.stop().await;
        // A pass cut short leaves its records Pending; the next start picks them up.
        self.worker.abort();
        if let Err(e) = self.worker.await {
            if !e.is_cancelled() {
                tracing::warn!("Sync worker ended abnormally: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CacheEntryLocal;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBackend {
        fail: AtomicBool,
        inserted: AtomicUsize,
        // Held after the row is committed, before the response.
        stall: Duration,
    }

    #[async_trait]
    impl CatchBackend for FakeBackend {
        async fn insert_catch(&self, _catch: &Catch) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("HTTP 503"));
            }
            self.inserted.fetch_add(1, Ordering::SeqCst);
            if !self.stall.is_zero() {
                tokio::time::sleep(self.stall).await;
            }
            Ok(())
        }
    }

    struct FixedProbe(AtomicBool);

    #[async_trait]
    impl ReachabilityProbe for FixedProbe {
        async fn check(&self) -> Result<bool> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    fn client(
        online: bool,
    ) -> (
        Arc<MemoryStorage>,
        Arc<FakeBackend>,
        CatchLogClient,
    ) {
        let storage = Arc::new(MemoryStorage::new());
        let backend = Arc::new(FakeBackend::default());
        let probe = Arc::new(FixedProbe(AtomicBool::new(online)));
        let client = CatchLogClient::builder(storage.clone(), backend.clone(), probe).build();
        (storage, backend, client)
    }

    fn bass() -> CatchInput {
        CatchInput::new("Smallmouth Bass", Location::new(43.1, -77.6)).with_length(38.0)
    }

    #[tokio::test]
    async fn test_offline_capture_is_saved_locally() {
        let (_, backend, client) = client(false);
        client.probe().await;

        let outcome = client.record_catch(bass()).await.unwrap();
        match &outcome {
            CaptureOutcome::SavedLocally { id_local, message } => {
                assert!(id_local.starts_with("offline_"));
                assert_eq!(message, SAVED_LOCALLY_MESSAGE);
            }
            other => panic!("expected SavedLocally, got {:?}", other),
        }
        assert_eq!(client.pending().len(), 1);
        assert_eq!(backend.inserted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_connectivity_queues_locally() {
        let (_, _, client) = client(true);
        assert!(client.record_catch(bass()).await.unwrap().is_queued());
    }

    #[tokio::test]
    async fn test_online_capture_uploads_directly() {
        let (_, backend, client) = client(true);
        client.probe().await;

        let outcome = client.record_catch(bass()).await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Uploaded);
        assert_eq!(backend.inserted.load(Ordering::SeqCst), 1);
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn test_failed_direct_upload_falls_back_to_queue() {
        let (_, backend, client) = client(true);
        client.probe().await;
        backend.fail.store(true, Ordering::SeqCst);

        assert!(client.record_catch(bass()).await.unwrap().is_queued());
        assert_eq!(client.status().pending_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_direct_upload_is_not_queued() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = Arc::new(FakeBackend {
            stall: Duration::from_secs(60),
            ..Default::default()
        });
        let client = CatchLogClient::builder(
            storage,
            backend.clone(),
            Arc::new(FixedProbe(AtomicBool::new(true))),
        )
        .build();
        client.probe().await;

        let err = client.record_catch(bass()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("timed out"));
        assert!(client.pending().is_empty());

        let result = client.sync_now().await;
        assert_eq!(result.synced_count, 0);
        assert_eq!(backend.inserted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced() {
        let (storage, _, client) = client(false);
        storage.set_fail_writes(true);
        assert!(client.record_catch(bass()).await.is_err());
    }

    #[tokio::test]
    async fn test_build_purges_expired_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let past = Utc::now() - chrono::Duration::days(10);
        storage
            .put_cache_entry(CacheEntryLocal {
                key: "species".to_string(),
                payload: "[]".to_string(),
                cached_at: past,
                expires_at: past + chrono::Duration::days(7),
                origin_location: None,
            })
            .unwrap();

        let _client = CatchLogClient::builder(
            storage.clone(),
            Arc::new(FakeBackend::default()),
            Arc::new(FixedProbe(AtomicBool::new(false))),
        )
        .build();
        assert!(storage.cache_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_syncs_existing_backlog() {
        let storage = Arc::new(MemoryStorage::new());
        LocalRecordStore::new(storage.clone()).append(bass()).unwrap();
        let backend = Arc::new(FakeBackend::default());
        let client = CatchLogClient::builder(
            storage,
            backend.clone(),
            Arc::new(FixedProbe(AtomicBool::new(true))),
        )
        .build();

        let runtime = client.start().await.unwrap();
        for _ in 0..100 {
            if client.store().pending_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.store().pending_count(), 0);
        assert_eq!(backend.inserted.load(Ordering::SeqCst), 1);
        assert!(client.start().await.is_err());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_sync_runs_pass_on_worker() {
        let (_, backend, client) = client(false);
        client.probe().await;
        client.record_catch(bass()).await.unwrap();
        client.record_catch(bass()).await.unwrap();

        let runtime = client.start().await.unwrap();
        assert_eq!(client.store().pending_count(), 2);

        client.request_sync().await.unwrap();
        for _ in 0..100 {
            if client.status().last_result.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(client.store().pending_count(), 0);
        assert_eq!(backend.inserted.load(Ordering::SeqCst), 2);
        assert_eq!(
            client.status().last_result.map(|r| r.synced_count),
            Some(2)
        );

        runtime.shutdown().await;
        assert!(client.request_sync().await.is_err());
    }

    #[tokio::test]
    async fn test_save_photo_requires_vault() {
        let (_, _, client) = client(false);
        assert!(client.save_photo("/tmp/none.jpg", "x").await.is_err());
    }
}
