pub mod v1;

// ===== VERSIONED MODELS FOLLOWING NATIVE_DB PATTERN =====
// The native_model version on each persisted struct is the on-disk schema version.
// A schema change adds a v2 module and re-points the alias below.

pub mod data {
    pub type CatchLocal = super::v1::CatchLocal;
    pub type CacheEntryLocal = super::v1::CacheEntryLocal;

    // Plain serde types (not persisted as native_db models)
    pub type Catch = super::v1::Catch;
    pub type CatchInput = super::v1::CatchInput;
    pub type Location = super::v1::Location;
    pub type WeatherSnapshot = super::v1::WeatherSnapshot;
    pub type WeatherReport = super::v1::WeatherReport;
    pub type FishSpecies = super::v1::FishSpecies;
    pub type SyncResult = super::v1::SyncResult;

    pub use super::v1;
}

pub use data::*;

pub use v1::{CatchOrigin, Rarity, SyncState, Syncable, WaterType};
