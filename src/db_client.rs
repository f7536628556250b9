use crate::models::{Catch, FishSpecies};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use postgrest::Postgrest;
use serde::Serialize;

pub const CATCHES_TABLE: &str = "catches";
pub const SPECIES_TABLE: &str = "fish_species";

/// Remote insert-catch operation used by the sync coordinator and the online capture path.
#[async_trait]
pub trait CatchBackend: Send + Sync {
    async fn insert_catch(&self, catch: &Catch) -> Result<()>;
}

/// Source of the species reference list.
#[async_trait]
pub trait SpeciesSource: Send + Sync {
    async fn fetch_species(&self) -> Result<Vec<FishSpecies>>;
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub rest_url: String,
    pub supabase_api_key: String,
    pub user_token: Option<String>,
}

impl DatabaseConfig {
    /// Environment loading lives in `AppConfig::from_env`.
    pub fn new(rest_url: String, supabase_api_key: String, user_token: Option<String>) -> Result<Self> {
        Ok(Self {
            rest_url: normalize_rest_url(&rest_url)?,
            supabase_api_key,
            user_token,
        })
    }

    /// Gets the PostgREST endpoint URL
    pub fn get_rest_url(&self) -> &str {
        &self.rest_url
    }

    /// Gets the Supabase API key for PostgREST access
    pub fn get_supabase_api_key(&self) -> &str {
        &self.supabase_api_key
    }
}

/// Ensures the URL parses and ends with the PostgREST path.
fn normalize_rest_url(raw: &str) -> Result<String> {
    let mut rest_url = raw.trim().to_string();
    url::Url::parse(&rest_url).map_err(|e| anyhow!("Invalid database REST URL {}: {}", rest_url, e))?;

    if !rest_url.ends_with("/rest/v1") {
        if rest_url.ends_with('/') {
            rest_url.push_str("rest/v1");
        } else {
            rest_url.push_str("/rest/v1");
        }
    }
    Ok(rest_url)
}

pub struct CatchDbClient {
    config: DatabaseConfig,
    client: Postgrest,
}

impl std::fmt::Debug for CatchDbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatchDbClient")
            .field("rest_url", &self.config.rest_url)
            .finish()
    }
}

impl CatchDbClient {
    pub fn new(config: DatabaseConfig) -> Self {
        let mut client = Postgrest::new(config.get_rest_url())
            .insert_header("apikey", config.get_supabase_api_key());
        if let Some(token) = &config.user_token {
            client = client.insert_header("Authorization", format!("Bearer {}", token));
        }
        Self { config, client }
    }

    /// Inserts one row and checks the response status
    pub async fn insert<T: Serialize>(&self, table: &str, data: &T) -> Result<()> {
        let json_data = serde_json::to_string(&[data])?;

        let response = self.client.from(table).insert(json_data).execute().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Insert into {} failed: HTTP {} - {}",
                table,
                status,
                describe_error_body(&body)
            ));
        }

        Ok(())
    }

    /// Selects all rows of a table
    pub async fn select_all<T>(&self, table: &str) -> Result<Vec<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let response = self.client.from(table).select("*").execute().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!(
                "Select from {} failed: HTTP {} - {}",
                table,
                status,
                describe_error_body(&body)
            ));
        }

        serde_json::from_str::<Vec<T>>(&body)
            .map_err(|e| anyhow!("Failed to parse {} response as JSON: {} - {}", table, e, body))
    }
}

#[async_trait]
impl CatchBackend for CatchDbClient {
    async fn insert_catch(&self, catch: &Catch) -> Result<()> {
        self.insert(CATCHES_TABLE, catch).await
    }
}

#[async_trait]
impl SpeciesSource for CatchDbClient {
    async fn fetch_species(&self) -> Result<Vec<FishSpecies>> {
        self.select_all(SPECIES_TABLE).await
    }
}

/// Pulls the PostgREST `message`/`error` field out of an error body when there is one.
fn describe_error_body(body: &str) -> String {
    if let Ok(error_response) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = error_response.get("message").and_then(|m| m.as_str()) {
            return message.to_string();
        }
        if let Some(error_msg) = error_response.get("error").and_then(|m| m.as_str()) {
            return error_msg.to_string();
        }
    }
    body.to_string()
}
