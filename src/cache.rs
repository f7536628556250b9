//! Time-boxed cache for slowly changing reference and environmental data.
//!
//! A read is a hit only while `now < expires_at` and, for entries that recorded an origin
//! location, while the caller is within the spatial threshold of that origin (inclusive).

use crate::geo::distance_km;
use crate::models::{CacheEntryLocal, FishSpecies, Location, WeatherReport};
use crate::storage::StorageProvider;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const WEATHER_KEY: &str = "weather";
pub const SPECIES_KEY: &str = "species";
pub const DEFAULT_SPATIAL_THRESHOLD_KM: f64 = 5.0;

pub fn weather_ttl() -> Duration {
    Duration::hours(24)
}

pub fn species_ttl() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Expired,
    OutOfRange,
    /// Storage or payload could not be read; treated like a miss.
    Unreadable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    Miss(MissReason),
}

impl<T> CacheLookup<T> {
    pub fn hit(self) -> Option<T> {
        match self {
            CacheLookup::Hit(data) => Some(data),
            CacheLookup::Miss(_) => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

pub struct CacheStore {
    storage: Arc<dyn StorageProvider>,
    spatial_threshold_km: f64,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("spatial_threshold_km", &self.spatial_threshold_km)
            .finish()
    }
}

impl CacheStore {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self::with_threshold(storage, DEFAULT_SPATIAL_THRESHOLD_KM)
    }

    pub fn with_threshold(storage: Arc<dyn StorageProvider>, spatial_threshold_km: f64) -> Self {
        Self {
            storage,
            spatial_threshold_km,
        }
    }

    pub fn put<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Duration,
        origin_location: Option<Location>,
    ) -> Result<()> {
        self.put_at(key, data, ttl, origin_location, Utc::now())
    }

    /// Overwrites whatever is stored under `key`.
    pub fn put_at<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl: Duration,
        origin_location: Option<Location>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if ttl <= Duration::zero() {
            return Err(anyhow!("Cache TTL for {} must be positive", key));
        }
        let payload = serde_json::to_string(data)
            .with_context(|| format!("Failed to serialize cache payload for {}", key))?;

        self.storage
            .put_cache_entry(CacheEntryLocal {
                key: key.to_string(),
                payload,
                cached_at: now,
                expires_at: now + ttl,
                origin_location,
            })
            .with_context(|| format!("Failed to write cache entry {}", key))
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        current_location: Option<&Location>,
    ) -> CacheLookup<T> {
        self.get_at(key, current_location, Utc::now())
    }

    /// Without a `current_location` only freshness is checked.
    pub fn get_at<T: DeserializeOwned>(
        &self,
        key: &str,
        current_location: Option<&Location>,
        now: DateTime<Utc>,
    ) -> CacheLookup<T> {
        let entry = match self.storage.cache_entry(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return self.miss(key, MissReason::Absent),
            Err(e) => {
                tracing::warn!("Failed to read cache entry {}: {:#}", key, e);
                return self.miss(key, MissReason::Unreadable);
            }
        };

        if entry.is_expired_at(now) {
            return self.miss(key, MissReason::Expired);
        }

        if let (Some(origin), Some(current)) = (entry.origin_location.as_ref(), current_location) {
            let distance = distance_km(origin, current);
            if distance > self.spatial_threshold_km {
                tracing::debug!(
                    "Cache entry {} is {:.2} km from caller (limit {} km)",
                    key,
                    distance,
                    self.spatial_threshold_km
                );
                return self.miss(key, MissReason::OutOfRange);
            }
        }

        match serde_json::from_str(&entry.payload) {
            Ok(data) => CacheLookup::Hit(data),
            Err(e) => {
                tracing::warn!("Cache entry {} has an unreadable payload: {}", key, e);
                self.miss(key, MissReason::Unreadable)
            }
        }
    }

    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(Utc::now())
    }

    /// Removes entries with `expires_at <= now` and returns how many were removed.
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut purged = 0;
        for entry in self.storage.cache_entries()? {
            if entry.is_expired_at(now) && self.storage.remove_cache_entry(&entry.key)? {
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!("Purged {} expired cache entries", purged);
        }
        Ok(purged)
    }

    // ===== TYPED HELPERS =====

    pub fn put_weather(&self, report: &WeatherReport, location: Location) -> Result<()> {
        self.put(WEATHER_KEY, report, weather_ttl(), Some(location))
    }

    pub fn get_weather(&self, location: &Location) -> CacheLookup<WeatherReport> {
        self.get(WEATHER_KEY, Some(location))
    }

    pub fn put_species(&self, species: &[FishSpecies]) -> Result<()> {
        self.put(SPECIES_KEY, &species, species_ttl(), None)
    }

    pub fn get_species(&self) -> CacheLookup<Vec<FishSpecies>> {
        self.get(SPECIES_KEY, None)
    }

    fn miss<T>(&self, key: &str, reason: MissReason) -> CacheLookup<T> {
        tracing::debug!("Cache miss for {}: {:?}", key, reason);
        CacheLookup::Miss(reason)
    }
}
