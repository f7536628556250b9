pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod db_client;
pub mod geo;
pub mod models;
pub mod photos;
pub mod record_store;
pub mod refresh;
pub mod storage;
pub mod sync;
pub mod weather;

pub use client::{CaptureOutcome, CatchLogClient, ClientStatus};
pub use config::{AppConfig, SyncSettings};
pub use connectivity::ConnectivityState;
pub use models::{CatchInput, Location, SyncResult};
