//! Storage providers the record store and cache store are built on.
//!
//! [`NativeDbStorage`] is the durable on-device backend (one native_db file holding both
//! catches and cache entries). [`MemoryStorage`] keeps everything in process memory and can be
//! told to fail reads or writes, which is how the degrade/propagate paths are exercised.

use crate::models::{CacheEntryLocal, CatchLocal};
use anyhow::{anyhow, Context, Result};
use native_db::{Builder, Database, Models};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Every mutating call is a single-record atomic operation; there is no bulk rewrite.
pub trait StorageProvider: Send + Sync {
    fn catches(&self) -> Result<Vec<CatchLocal>>;
    fn catch(&self, id_local: &str) -> Result<Option<CatchLocal>>;
    /// Fails if a record with the same `id_local` already exists.
    fn insert_catch(&self, catch: CatchLocal) -> Result<()>;
    /// Replaces an existing record. Returns `false` when no record has that id.
    fn update_catch(&self, catch: CatchLocal) -> Result<bool>;
    fn remove_catch(&self, id_local: &str) -> Result<bool>;

    fn cache_entry(&self, key: &str) -> Result<Option<CacheEntryLocal>>;
    fn cache_entries(&self) -> Result<Vec<CacheEntryLocal>>;
    fn put_cache_entry(&self, entry: CacheEntryLocal) -> Result<()>;
    fn remove_cache_entry(&self, key: &str) -> Result<bool>;
}

static MODELS: Lazy<Models> = Lazy::new(|| {
    let mut models = Models::new();
    models
        .define::<CatchLocal>()
        .expect("CatchLocal model definition is static");
    models
        .define::<CacheEntryLocal>()
        .expect("CacheEntryLocal model definition is static");
    models
});

pub struct NativeDbStorage {
    database: Database<'static>,
}

impl std::fmt::Debug for NativeDbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeDbStorage").finish_non_exhaustive()
    }
}

impl NativeDbStorage {
    /// Opens the database file at `path`, creating it (and its parent directory) if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create storage directory {}", parent.display())
                })?;
            }
        }

        let database = Builder::new()
            .create(&MODELS, path)
            .map_err(|e| anyhow!("Failed to open catch database {}: {}", path.display(), e))?;
        tracing::debug!("Opened catch database at {}", path.display());

        Ok(Self { database })
    }

    pub fn in_memory() -> Result<Self> {
        let database = Builder::new()
            .create_in_memory(&MODELS)
            .map_err(|e| anyhow!("Failed to create in-memory catch database: {}", e))?;
        Ok(Self { database })
    }
}

impl StorageProvider for NativeDbStorage {
    fn catches(&self) -> Result<Vec<CatchLocal>> {
        let r = self.database.r_transaction()?;
        let catches = r
            .scan()
            .primary::<CatchLocal>()?
            .all()?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(catches)
    }

    fn catch(&self, id_local: &str) -> Result<Option<CatchLocal>> {
        let r = self.database.r_transaction()?;
        Ok(r.get().primary(id_local.to_string())?)
    }

    fn insert_catch(&self, catch: CatchLocal) -> Result<()> {
        let id_local = catch.id_local.clone();
        let rw = self.database.rw_transaction()?;
        rw.insert(catch)
            .map_err(|e| anyhow!("Failed to insert catch {}: {}", id_local, e))?;
        rw.commit()?;
        Ok(())
    }

    fn update_catch(&self, catch: CatchLocal) -> Result<bool> {
        let rw = self.database.rw_transaction()?;
        let existing: Option<CatchLocal> = rw.get().primary(catch.id_local.clone())?;
        let Some(existing) = existing else {
            return Ok(false);
        };
        let id_local = catch.id_local.clone();
        rw.update(existing, catch)
            .map_err(|e| anyhow!("Failed to update catch {}: {}", id_local, e))?;
        rw.commit()?;
        Ok(true)
    }

    fn remove_catch(&self, id_local: &str) -> Result<bool> {
        let rw = self.database.rw_transaction()?;
        let existing: Option<CatchLocal> = rw.get().primary(id_local.to_string())?;
        let Some(existing) = existing else {
            return Ok(false);
        };
        rw.remove(existing)
            .map_err(|e| anyhow!("Failed to remove catch {}: {}", id_local, e))?;
        rw.commit()?;
        Ok(true)
    }

    fn cache_entry(&self, key: &str) -> Result<Option<CacheEntryLocal>> {
        let r = self.database.r_transaction()?;
        Ok(r.get().primary(key.to_string())?)
    }

    fn cache_entries(&self) -> Result<Vec<CacheEntryLocal>> {
        let r = self.database.r_transaction()?;
        let entries = r
            .scan()
            .primary::<CacheEntryLocal>()?
            .all()?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn put_cache_entry(&self, entry: CacheEntryLocal) -> Result<()> {
        let key = entry.key.clone();
        let rw = self.database.rw_transaction()?;
        rw.upsert(entry)
            .map_err(|e| anyhow!("Failed to write cache entry {}: {}", key, e))?;
        rw.commit()?;
        Ok(())
    }

    fn remove_cache_entry(&self, key: &str) -> Result<bool> {
        let rw = self.database.rw_transaction()?;
        let existing: Option<CacheEntryLocal> = rw.get().primary(key.to_string())?;
        let Some(existing) = existing else {
            return Ok(false);
        };
        rw.remove(existing)
            .map_err(|e| anyhow!("Failed to remove cache entry {}: {}", key, e))?;
        rw.commit()?;
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    catches: Vec<CatchLocal>,
    cache: HashMap<String, CacheEntryLocal>,
}

/// In-process fake. Catches are kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every read fail as if the backing file were unreadable.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write fail as if the device were out of space.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("Storage unavailable: simulated read failure"));
        }
        self.inner
            .lock()
            .map_err(|_| anyhow!("Memory storage lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("Storage unavailable: simulated write failure"));
        }
        self.inner
            .lock()
            .map_err(|_| anyhow!("Memory storage lock poisoned"))
    }
}

impl StorageProvider for MemoryStorage {
    fn catches(&self) -> Result<Vec<CatchLocal>> {
        Ok(self.read()?.catches.clone())
    }

    fn catch(&self, id_local: &str) -> Result<Option<CatchLocal>> {
        Ok(self
            .read()?
            .catches
            .iter()
            .find(|c| c.id_local == id_local)
            .cloned())
    }

    fn insert_catch(&self, catch: CatchLocal) -> Result<()> {
        let mut inner = self.write()?;
        if inner.catches.iter().any(|c| c.id_local == catch.id_local) {
            return Err(anyhow!("Duplicate catch id: {}", catch.id_local));
        }
        inner.catches.push(catch);
        Ok(())
    }

    fn update_catch(&self, catch: CatchLocal) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.catches.iter_mut().find(|c| c.id_local == catch.id_local) {
            Some(slot) => {
                *slot = catch;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_catch(&self, id_local: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let before = inner.catches.len();
        inner.catches.retain(|c| c.id_local != id_local);
        Ok(inner.catches.len() != before)
    }

    fn cache_entry(&self, key: &str) -> Result<Option<CacheEntryLocal>> {
        Ok(self.read()?.cache.get(key).cloned())
    }

    fn cache_entries(&self) -> Result<Vec<CacheEntryLocal>> {
        Ok(self.read()?.cache.values().cloned().collect())
    }

    fn put_cache_entry(&self, entry: CacheEntryLocal) -> Result<()> {
        self.write()?.cache.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn remove_cache_entry(&self, key: &str) -> Result<bool> {
        Ok(self.write()?.cache.remove(key).is_some())
    }
}
