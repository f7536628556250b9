use crate::cache::DEFAULT_SPATIAL_THRESHOLD_KM;
use crate::connectivity::MonitorSettings;
use crate::db_client::DatabaseConfig;
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATA_DIR: &str = "./catchlog_data";
pub const DATABASE_FILE: &str = "catchlog.db";

/// Timing knobs for the monitor and the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub spatial_threshold_km: f64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            debounce: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            spatial_threshold_km: DEFAULT_SPATIAL_THRESHOLD_KM,
        }
    }
}

impl SyncSettings {
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: self.poll_interval,
            debounce: self.debounce,
            probe_timeout: self.request_timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// `None` when no backend is configured; only local operations work then.
    pub database: Option<DatabaseConfig>,
    pub data_dir: PathBuf,
    pub probe_url: Option<String>,
    pub weather_api_key: Option<String>,
    pub settings: SyncSettings,
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let database = match var("CATCHLOG_DATABASE_REST_URL") {
            Some(rest_url) => {
                let api_key = var("SUPABASE_PUBLIC_API_KEY").ok_or_else(|| {
                    anyhow!("SUPABASE_PUBLIC_API_KEY environment variable is required for Supabase access")
                })?;
                Some(DatabaseConfig::new(
                    rest_url,
                    api_key,
                    var("CATCHLOG_USER_TOKEN"),
                )?)
            }
            None => None,
        };

        let probe_url = match var("CATCHLOG_PROBE_URL") {
            Some(url) => {
                url::Url::parse(&url)
                    .map_err(|e| anyhow!("Invalid CATCHLOG_PROBE_URL {}: {}", url, e))?;
                Some(url)
            }
            None => database.as_ref().map(|db| db.get_rest_url().to_string()),
        };

        let defaults = SyncSettings::default();
        let settings = SyncSettings {
            poll_interval: seconds(&var, "CATCHLOG_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            debounce: seconds(&var, "CATCHLOG_SYNC_DEBOUNCE_SECS", defaults.debounce)?,
            request_timeout: seconds(
                &var,
                "CATCHLOG_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            )?,
            spatial_threshold_km: defaults.spatial_threshold_km,
        };

        Ok(Self {
            database,
            data_dir: var("CATCHLOG_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            probe_url,
            weather_api_key: var("CATCHLOG_WEATHER_API_KEY"),
            settings,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn require_database(&self) -> Result<&DatabaseConfig> {
        self.database
            .as_ref()
            .ok_or_else(|| anyhow!("CATCHLOG_DATABASE_REST_URL environment variable is required"))
    }
}

fn seconds<F>(var: &F, name: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("Invalid {} value {:?}: {}", name, raw, e))?;
            if secs == 0 {
                return Err(anyhow!("{} must be greater than zero", name));
            }
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}
