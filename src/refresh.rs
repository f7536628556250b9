//! Best-effort cache warming that runs next to a sync pass.
//!
//! Nothing here is awaited by the sync coordinator. Every failure is logged and dropped.

use crate::cache::CacheStore;
use crate::db_client::SpeciesSource;
use crate::models::Location;
use crate::weather::WeatherSource;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Fire-and-forget refresh hook handed to the sync coordinator.
pub trait BackgroundRefresh: Send + Sync {
    fn spawn_refresh(&self, location: Option<Location>) -> Vec<JoinHandle<()>>;
}

pub struct CacheWarmer {
    cache: Arc<CacheStore>,
    species_source: Option<Arc<dyn SpeciesSource>>,
    weather_source: Option<Arc<dyn WeatherSource>>,
}

impl CacheWarmer {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self {
            cache,
            species_source: None,
            weather_source: None,
        }
    }

    pub fn with_species_source(mut self, source: Arc<dyn SpeciesSource>) -> Self {
        self.species_source = Some(source);
        self
    }

    pub fn with_weather_source(mut self, source: Arc<dyn WeatherSource>) -> Self {
        self.weather_source = Some(source);
        self
    }

    /// Returns `true` when a fresh copy was fetched and cached.
    pub async fn warm_weather(&self, location: Location) -> bool {
        let Some(source) = &self.weather_source else {
            return false;
        };
        if self.cache.get_weather(&location).is_hit() {
            return false;
        }

        match source.current_weather(&location).await {
            Ok(report) => match self.cache.put_weather(&report, location) {
                Ok(()) => {
                    tracing::debug!(
                        "Cached weather for {:.4},{:.4}",
                        location.latitude,
                        location.longitude
                    );
                    true
                }
                Err(e) => {
                    tracing::warn!("Failed to cache weather data: {:#}", e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!("Failed to refresh weather data: {:#}", e);
                false
            }
        }
    }

    /// Returns `true` when a fresh copy was fetched and cached.
    pub async fn warm_species(&self) -> bool {
        let Some(source) = &self.species_source else {
            return false;
        };
        if self.cache.get_species().is_hit() {
            return false;
        }

        match source.fetch_species().await {
            Ok(species) => match self.cache.put_species(&species) {
                Ok(()) => {
                    tracing::debug!("Cached {} species", species.len());
                    true
                }
                Err(e) => {
                    tracing::warn!("Failed to cache species data: {:#}", e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!("Failed to refresh species data: {:#}", e);
                false
            }
        }
    }
}

impl BackgroundRefresh for Arc<CacheWarmer> {
    fn spawn_refresh(&self, location: Option<Location>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(location) = location {
            let warmer = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                warmer.warm_weather(location).await;
            }));
        }

        let warmer = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            warmer.warm_species().await;
        }));

        handles
    }
}
