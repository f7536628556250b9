use anyhow::{anyhow, Result};
use async_trait::async_trait;
use catchlog_rs::client::CatchLogClient;
use catchlog_rs::config::SyncSettings;
use catchlog_rs::connectivity::{ConnectivityState, ReachabilityProbe};
use catchlog_rs::db_client::CatchBackend;
use catchlog_rs::models::{Catch, CatchInput, Location, SyncState};
use catchlog_rs::record_store::LocalRecordStore;
use catchlog_rs::storage::{MemoryStorage, NativeDbStorage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// # Offline Sync Scenarios
///
/// End-to-end behaviour of the catch queue, connectivity monitor and sync coordinator,
/// wired through `CatchLogClient` with an in-memory store, a scripted backend and a
/// scripted reachability probe. Durable-store cases use a temporary native_db file.
///
/// ```bash
/// cargo test --test offline_sync_test
/// ```

#[derive(Default)]
struct ScriptedBackend {
    rejected: Mutex<HashSet<String>>,
    delay: Duration,
    received: Mutex<Vec<String>>,
    calls: AtomicUsize,
    // Calls answered with a transient error before anything is stored.
    unavailable: AtomicUsize,
    stall_after_commit: Duration,
}

impl ScriptedBackend {
    fn reject(&self, species: &str) {
        self.rejected.lock().unwrap().insert(species.to_string());
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatchBackend for ScriptedBackend {
    async fn insert_catch(&self, catch: &Catch) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("HTTP 503: service unavailable"));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.rejected.lock().unwrap().contains(&catch.species) {
            return Err(anyhow!("violates check constraint"));
        }
        self.received.lock().unwrap().push(catch.species.clone());
        if !self.stall_after_commit.is_zero() {
            tokio::time::sleep(self.stall_after_commit).await;
        }
        Ok(())
    }
}

struct SwitchProbe(AtomicBool);

impl SwitchProbe {
    fn set(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn check(&self) -> Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

struct Harness {
    backend: Arc<ScriptedBackend>,
    probe: Arc<SwitchProbe>,
    client: CatchLogClient,
}

fn harness(backend: ScriptedBackend) -> Harness {
    let backend = Arc::new(backend);
    let probe = Arc::new(SwitchProbe(AtomicBool::new(false)));
    let client = CatchLogClient::builder(
        Arc::new(MemoryStorage::new()),
        backend.clone(),
        probe.clone(),
    )
    .settings(SyncSettings::default())
    .build();
    Harness {
        backend,
        probe,
        client,
    }
}

fn catch(species: &str) -> CatchInput {
    CatchInput::new(species, Location::new(-41.29, 174.78).with_accuracy(5.0))
}

async fn log_offline(harness: &Harness, species: &[&str]) -> Vec<String> {
    assert_eq!(harness.client.probe().await, ConnectivityState::Offline);
    let mut ids = Vec::new();
    for s in species {
        match harness.client.record_catch(catch(s)).await.unwrap() {
            catchlog_rs::CaptureOutcome::SavedLocally { id_local, .. } => ids.push(id_local),
            other => panic!("expected a local save while offline, got {:?}", other),
        }
    }
    ids
}

#[tokio::test]
async fn test_rejected_record_is_the_only_one_left() {
    let h = harness(ScriptedBackend::default());
    h.backend.reject("B");
    let ids = log_offline(&h, &["A", "B", "C"]).await;

    h.probe.set(true);
    assert_eq!(h.client.probe().await, ConnectivityState::Online);
    let result = h.client.sync_now().await;

    assert!(!result.success);
    assert_eq!(result.synced_count, 2);
    assert_eq!(result.failed_count, 1);
    assert_eq!(
        result.errors,
        vec![format!("{}: violates check constraint", ids[1])]
    );
    assert_eq!(h.backend.received(), vec!["A", "C"]);

    let remaining = h.client.store().all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id_local, ids[1]);
    assert_eq!(remaining[0].sync_state, SyncState::Pending);
}

#[tokio::test]
async fn test_synced_count_matches_failures_for_any_mix() {
    for (n, m) in [(1, 0), (1, 1), (4, 2), (6, 6), (7, 3)] {
        let h = harness(ScriptedBackend::default());
        let species: Vec<String> = (0..n).map(|i| format!("fish-{}", i)).collect();
        // The last M records are the ones the backend refuses.
        let mut rejected = Vec::new();
        for s in species.iter().rev() {
            if rejected.len() < m {
                h.backend.reject(s);
                rejected.push(s.clone());
            }
        }
        let refs: Vec<&str> = species.iter().map(String::as_str).collect();
        log_offline(&h, &refs).await;

        let result = h.client.sync_now().await;
        assert_eq!(result.synced_count, n - m, "n={} m={}", n, m);
        assert_eq!(result.failed_count, m, "n={} m={}", n, m);
        assert_eq!(result.errors.len(), m, "n={} m={}", n, m);
        assert_eq!(result.success, m == 0);

        let remaining: HashSet<String> = h
            .client
            .store()
            .all()
            .unwrap()
            .into_iter()
            .map(|c| {
                assert_eq!(c.sync_state, SyncState::Pending);
                c.species
            })
            .collect();
        assert_eq!(remaining, rejected.into_iter().collect::<HashSet<_>>());
    }
}

#[tokio::test]
async fn test_pending_preserves_append_order() {
    let h = harness(ScriptedBackend::default());
    let species: Vec<String> = (0..25).map(|i| format!("fish-{:02}", i)).collect();
    let refs: Vec<&str> = species.iter().map(String::as_str).collect();
    let ids = log_offline(&h, &refs).await;

    let pending = h.client.pending();
    assert!(pending.warning.is_none());
    assert_eq!(pending.len(), 25);
    let listed: Vec<String> = pending.catches.iter().map(|c| c.id_local.clone()).collect();
    assert_eq!(listed, ids);
}

#[tokio::test(start_paused = true)]
async fn test_manual_sync_during_automatic_sync_is_rejected() {
    let h = harness(ScriptedBackend {
        delay: Duration::from_secs(2),
        ..Default::default()
    });
    log_offline(&h, &["A", "B", "C"]).await;

    let (first, second) = tokio::join!(h.client.sync_now(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.client.sync_now().await
    });

    assert!(first.success);
    assert_eq!(first.synced_count, 3);
    assert!(!second.success);
    assert_eq!(second.errors, vec!["Sync already in progress".to_string()]);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.backend.received(), vec!["A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_drains_queue_in_background() {
    let h = harness(ScriptedBackend::default());
    let runtime = h.client.start().await.unwrap();
    log_offline(&h, &["A", "B"]).await;
    assert_eq!(h.client.status().pending_count, 0);

    h.probe.set(true);
    // Next poll sees Online, then the debounce elapses and the worker runs a pass.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.client.monitor().state(), ConnectivityState::Online);
    assert_eq!(h.client.store().pending_count(), 0);
    assert_eq!(h.backend.received(), vec!["A", "B"]);
    let status = h.client.status();
    assert!(status.last_sync_at.is_some());
    assert_eq!(status.last_result.map(|r| r.synced_count), Some(2));

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_catch_queued_while_online_is_synced_in_background() {
    let h = harness(ScriptedBackend::default());
    h.probe.set(true);
    let runtime = h.client.start().await.unwrap();
    assert_eq!(h.client.monitor().state(), ConnectivityState::Online);

    h.backend.unavailable.store(1, Ordering::SeqCst);
    let outcome = h.client.record_catch(catch("Pike")).await.unwrap();
    assert!(outcome.is_queued());
    assert_eq!(h.client.status().pending_count, 1);

    // Connectivity never changes; the queued catch still goes out after the debounce.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(h.client.store().pending_count(), 0);
    assert_eq!(h.backend.received(), vec!["Pike"]);
    assert_eq!(
        h.client.status().last_result.map(|r| r.synced_count),
        Some(1)
    );

    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_direct_upload_is_not_sent_twice() {
    let h = harness(ScriptedBackend {
        stall_after_commit: Duration::from_secs(60),
        ..Default::default()
    });
    h.probe.set(true);
    assert_eq!(h.client.probe().await, ConnectivityState::Online);

    let err = h.client.record_catch(catch("Pike")).await.unwrap_err();
    assert!(format!("{:#}", err).contains("timed out"));
    assert!(h.client.pending().is_empty());

    let result = h.client.sync_now().await;
    assert_eq!(result.synced_count, 0);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.backend.received(), vec!["Pike"]);
    assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_append_without_existing_store_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("fresh").join("catchlog.db");
    assert!(!path.exists());

    let store = LocalRecordStore::new(Arc::new(NativeDbStorage::open(&path).unwrap()));
    let id = store.append(catch("Kahawai")).unwrap();

    assert!(!id.is_empty());
    let pending = store.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending.catches[0].id_local, id);
}

#[tokio::test]
async fn test_queue_survives_restart_and_syncs_later() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("catchlog.db");

    let ids = {
        let store = LocalRecordStore::new(Arc::new(NativeDbStorage::open(&path).unwrap()));
        vec![
            store.append(catch("Snapper")).unwrap(),
            store.append(catch("Trevally")).unwrap(),
        ]
    };

    let backend = Arc::new(ScriptedBackend::default());
    let client = CatchLogClient::builder(
        Arc::new(NativeDbStorage::open(&path).unwrap()),
        backend.clone(),
        Arc::new(SwitchProbe(AtomicBool::new(true))),
    )
    .build();

    let listed: Vec<String> = client
        .pending()
        .catches
        .into_iter()
        .map(|c| c.id_local)
        .collect();
    assert_eq!(listed, ids);

    let result = client.sync_now().await;
    assert!(result.success);
    assert_eq!(backend.received(), vec!["Snapper", "Trevally"]);
    assert!(client.store().all().unwrap().is_empty());
}

#[test]
fn test_mark_then_evict_removes_exactly_one() {
    let store = LocalRecordStore::new(Arc::new(MemoryStorage::new()));
    let ids: Vec<String> = ["A", "B", "C", "D"]
        .iter()
        .map(|s| store.append(catch(s)).unwrap())
        .collect();

    for target in &ids {
        let before: HashSet<String> = store.all().unwrap().into_iter().map(|c| c.id_local).collect();
        store.mark_synced(target).unwrap();
        assert_eq!(store.evict_synced().unwrap(), 1);
        let after: HashSet<String> = store.all().unwrap().into_iter().map(|c| c.id_local).collect();

        let removed: Vec<&String> = before.difference(&after).collect();
        assert_eq!(removed, vec![target]);
        assert!(store.all().unwrap().iter().all(|c| c.sync_state == SyncState::Pending));
    }
    assert!(store.all().unwrap().is_empty());
}
