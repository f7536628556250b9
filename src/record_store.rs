use crate::models::{CatchInput, CatchLocal, SyncState, Syncable};
use crate::storage::StorageProvider;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::{Arc, Mutex};

const ID_PREFIX: &str = "offline";
const ID_SUFFIX_LEN: usize = 9;

/// Pending catches as last read from storage.
///
/// When storage could not be read, `catches` is empty and `warning` says why; the records
/// themselves are still on disk and will show up again once storage recovers.
#[derive(Debug, Clone, Default)]
pub struct PendingCatches {
    pub catches: Vec<CatchLocal>,
    pub warning: Option<String>,
}

impl PendingCatches {
    pub fn len(&self) -> usize {
        self.catches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catches.is_empty()
    }
}

/// Durable queue of catches captured without connectivity.
pub struct LocalRecordStore {
    storage: Arc<dyn StorageProvider>,
    // Serializes id/sequence assignment between concurrent appends.
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for LocalRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRecordStore").finish_non_exhaustive()
    }
}

impl LocalRecordStore {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            append_lock: Mutex::new(()),
        }
    }

    /// Persists a new pending catch and returns its freshly generated id.
    ///
    /// Any storage failure is returned to the caller; a catch is never silently dropped.
    pub fn append(&self, input: CatchInput) -> Result<String> {
        if input.species.trim().is_empty() {
            return Err(anyhow!("Catch species is required"));
        }

        let _guard = self
            .append_lock
            .lock()
            .map_err(|_| anyhow!("Record store append lock poisoned"))?;

        let existing = self
            .storage
            .catches()
            .context("Failed to read catch store before append")?;
        let next_seq = existing.iter().map(|c| c.seq).max().unwrap_or(0) + 1;

        let captured_at = Utc::now();
        let mut id_local = generate_id(captured_at.timestamp_millis());
        while existing.iter().any(|c| c.id_local == id_local) {
            id_local = generate_id(captured_at.timestamp_millis());
        }

        let record = CatchLocal::from_input(input, id_local.clone(), next_seq, captured_at);
        self.storage
            .insert_catch(record)
            .with_context(|| format!("Failed to save catch {} locally", id_local))?;

        tracing::info!("Saved catch {} locally (queue position {})", id_local, next_seq);
        Ok(id_local)
    }

    /// All pending catches, oldest first.
    pub fn list_pending(&self) -> PendingCatches {
        match self.storage.catches() {
            Ok(mut catches) => {
                catches.retain(|c| c.is_pending());
                catches.sort_by_key(|c| c.seq);
                PendingCatches {
                    catches,
                    warning: None,
                }
            }
            Err(e) => {
                let warning = format!("Failed to read pending catches: {:#}", e);
                tracing::warn!("{}", warning);
                PendingCatches {
                    catches: Vec::new(),
                    warning: Some(warning),
                }
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.list_pending().len()
    }

    /// Every stored catch regardless of state, oldest first.
    pub fn all(&self) -> Result<Vec<CatchLocal>> {
        let mut catches = self.storage.catches()?;
        catches.sort_by_key(|c| c.seq);
        Ok(catches)
    }

    /// Marks one catch as synced. Unknown or already synced ids are a no-op.
    pub fn mark_synced(&self, id_local: &str) -> Result<()> {
        let Some(mut record) = self.storage.catch(id_local)? else {
            tracing::debug!("mark_synced: no catch {}, ignoring", id_local);
            return Ok(());
        };
        if record.sync_state() == SyncState::Synced {
            return Ok(());
        }
        record.set_sync_state(SyncState::Synced);
        record.last_error = None;
        self.storage.update_catch(record)?;
        Ok(())
    }

    /// Notes a failed push on a pending catch. The catch stays pending.
    pub fn record_failure(&self, id_local: &str, cause: &str) -> Result<()> {
        let Some(mut record) = self.storage.catch(id_local)? else {
            return Ok(());
        };
        if record.sync_state() == SyncState::Synced {
            return Ok(());
        }
        record.attempts = record.attempts.saturating_add(1);
        record.last_error = Some(cause.to_string());
        self.storage.update_catch(record)?;
        Ok(())
    }

    /// Removes synced catches one by one and returns how many went. Pending ones are untouched.
    pub fn evict_synced(&self) -> Result<usize> {
        let synced: Vec<String> = self
            .storage
            .catches()?
            .into_iter()
            .filter(|c| c.sync_state() == SyncState::Synced)
            .map(|c| c.id_local)
            .collect();

        let mut evicted = 0;
        for id_local in synced {
            if self.storage.remove_catch(&id_local)? {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!("Evicted {} synced catches", evicted);
        }
        Ok(evicted)
    }
}

fn generate_id(millis: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", ID_PREFIX, millis, suffix)
}
