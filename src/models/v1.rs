use native_db::{native_db, ToKey};
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use chrono::{DateTime, Utc};

// ===== TRAITS =====
pub trait Syncable {
    fn id_local(&self) -> &str;
    fn sync_state(&self) -> SyncState;
    fn set_sync_state(&mut self, state: SyncState);

    fn is_pending(&self) -> bool {
        self.sync_state() == SyncState::Pending
    }
}

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchOrigin {
    CapturedOnline,
    CapturedOffline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Pending,
    Synced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Legendary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterType {
    Freshwater,
    Saltwater,
    Estuary,
}

// ===== VALUE TYPES =====

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Conditions captured at logging time. Never refreshed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub temperature: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub conditions: String,
}

// ===== CATCHES =====

/// What the UI hands over when a catch is logged. Only `species` and `location` are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchInput {
    pub species: String,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub bait: Option<String>,
    pub technique: Option<String>,
    pub notes: Option<String>,
    pub location: Location,
    pub captured_weather: Option<WeatherSnapshot>,
    pub photos: Vec<String>,
}

impl CatchInput {
    pub fn new(species: impl Into<String>, location: Location) -> Self {
        Self {
            species: species.into(),
            weight: None,
            length: None,
            bait: None,
            technique: None,
            notes: None,
            location,
            captured_weather: None,
            photos: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_bait(mut self, bait: impl Into<String>) -> Self {
        self.bait = Some(bait.into());
        self
    }

    pub fn with_technique(mut self, technique: impl Into<String>) -> Self {
        self.technique = Some(technique.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_weather(mut self, weather: WeatherSnapshot) -> Self {
        self.captured_weather = Some(weather);
        self
    }

    pub fn with_photo(mut self, photo: impl Into<String>) -> Self {
        self.photos.push(photo.into());
        self
    }
}

/// Durable on-device catch record.
///
/// `id_local` and `timestamp` are fixed at creation. `sync_state` is only ever moved by the
/// sync coordinator; `seq` preserves insertion order across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct CatchLocal {
    #[primary_key]
    pub id_local: String,
    pub seq: u64,
    pub species: String,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub bait: Option<String>,
    pub technique: Option<String>,
    pub notes: Option<String>,
    pub location: Location,
    pub captured_weather: Option<WeatherSnapshot>,
    pub photos: Vec<String>,
    pub timestamp: String,
    pub origin: CatchOrigin,
    pub sync_state: SyncState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl CatchLocal {
    pub fn from_input(
        input: CatchInput,
        id_local: String,
        seq: u64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id_local,
            seq,
            species: input.species,
            weight: input.weight,
            length: input.length,
            bait: input.bait,
            technique: input.technique,
            notes: input.notes,
            location: input.location,
            captured_weather: input.captured_weather,
            photos: input.photos,
            timestamp: captured_at.to_rfc3339(),
            origin: CatchOrigin::CapturedOffline,
            sync_state: SyncState::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// First photo is the primary one.
    pub fn primary_photo(&self) -> Option<&str> {
        self.photos.first().map(String::as_str)
    }
}

impl Syncable for CatchLocal {
    fn id_local(&self) -> &str {
        &self.id_local
    }

    fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    fn set_sync_state(&mut self, state: SyncState) {
        self.sync_state = state;
    }
}

/// Row shape for the remote `catches` table. Location is flattened and absent optional
/// fields serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catch {
    pub species: String,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub location_accuracy: Option<f64>,
    pub caught_at: String,
    pub weather_temperature: Option<f64>,
    pub weather_pressure: Option<f64>,
    pub weather_wind_speed: Option<f64>,
    pub weather_conditions: Option<String>,
    pub bait_used: Option<String>,
    pub technique: Option<String>,
    pub notes: Option<String>,
    pub photo_url: Option<String>,
    pub photos: Vec<String>,
}

impl From<&CatchLocal> for Catch {
    fn from(local: &CatchLocal) -> Self {
        let weather = local.captured_weather.as_ref();
        Self {
            species: local.species.clone(),
            weight: local.weight,
            length: local.length,
            latitude: local.location.latitude,
            longitude: local.location.longitude,
            location_accuracy: local.location.accuracy,
            caught_at: local.timestamp.clone(),
            weather_temperature: weather.map(|w| w.temperature),
            weather_pressure: weather.map(|w| w.pressure),
            weather_wind_speed: weather.map(|w| w.wind_speed),
            weather_conditions: weather.map(|w| w.conditions.clone()),
            bait_used: local.bait.clone(),
            technique: local.technique.clone(),
            notes: local.notes.clone(),
            photo_url: local.primary_photo().map(str::to_string),
            photos: local.photos.clone(),
        }
    }
}

impl Catch {
    /// Wire row for a catch captured while online; it never touches the local queue.
    pub fn from_input(input: &CatchInput, captured_at: DateTime<Utc>) -> Self {
        let weather = input.captured_weather.as_ref();
        Self {
            species: input.species.clone(),
            weight: input.weight,
            length: input.length,
            latitude: input.location.latitude,
            longitude: input.location.longitude,
            location_accuracy: input.location.accuracy,
            caught_at: captured_at.to_rfc3339(),
            weather_temperature: weather.map(|w| w.temperature),
            weather_pressure: weather.map(|w| w.pressure),
            weather_wind_speed: weather.map(|w| w.wind_speed),
            weather_conditions: weather.map(|w| w.conditions.clone()),
            bait_used: input.bait.clone(),
            technique: input.technique.clone(),
            notes: input.notes.clone(),
            photo_url: input.photos.first().cloned(),
            photos: input.photos.clone(),
        }
    }
}

// ===== SYNC RESULT =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub synced_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn empty() -> Self {
        Self {
            success: true,
            synced_count: 0,
            failed_count: 0,
            errors: Vec::new(),
        }
    }

    pub fn already_in_progress() -> Self {
        Self {
            success: false,
            synced_count: 0,
            failed_count: 0,
            errors: vec!["Sync already in progress".to_string()],
        }
    }

    pub fn record_success(&mut self) {
        self.synced_count += 1;
    }

    pub fn record_failure(&mut self, id_local: &str, cause: impl std::fmt::Display) {
        self.failed_count += 1;
        self.errors.push(format!("{}: {}", id_local, cause));
    }

    /// Seals the result; `success` is true iff nothing failed.
    pub fn finish(mut self) -> Self {
        self.success = self.failed_count == 0 && self.errors.is_empty();
        self
    }
}

impl Default for SyncResult {
    fn default() -> Self {
        Self::empty()
    }
}

// ===== CACHE =====

/// A cached payload (JSON text) with its freshness window and optional spatial origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct CacheEntryLocal {
    #[primary_key]
    pub key: String,
    pub payload: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub origin_location: Option<Location>,
}

impl CacheEntryLocal {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ===== REFERENCE DATA =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FishSpecies {
    pub id: String,
    pub name: String,
    pub scientific_name: Option<String>,
    pub region: String,
    pub photo_url: Option<String>,
    pub description: Option<String>,
    pub habitat: Option<String>,
    pub best_baits: Option<Vec<String>>,
    pub legal_size_limit: Option<f64>,
    pub rarity: Rarity,
    pub water_type: WaterType,
}

/// Current conditions for a location, as cached for the weather screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature: f64,
    pub feels_like: Option<f64>,
    pub pressure: f64,
    pub humidity: Option<f64>,
    pub wind_speed: f64,
    pub wind_direction: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub conditions: String,
    pub observed_at: DateTime<Utc>,
}

impl WeatherReport {
    pub fn snapshot(&self) -> WeatherSnapshot {
        WeatherSnapshot {
            temperature: self.temperature,
            pressure: self.pressure,
            wind_speed: self.wind_speed,
            conditions: self.conditions.clone(),
        }
    }
}
