use crate::models::{Location, WeatherReport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

pub const OPENWEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current_weather(&self, location: &Location) -> Result<WeatherReport>;
}

pub struct OpenWeatherClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for OpenWeatherClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenWeatherClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenWeatherClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        Self::with_base_url(OPENWEATHER_URL.to_string(), api_key, timeout)
    }

    pub fn with_base_url(base_url: String, api_key: String, timeout: Duration) -> Result<Self> {
        url::Url::parse(&base_url).map_err(|e| anyhow!("Invalid weather URL {}: {}", base_url, e))?;
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OwmResponse {
    main: OwmMain,
    wind: Option<OwmWind>,
    clouds: Option<OwmClouds>,
    #[serde(default)]
    weather: Vec<OwmCondition>,
    dt: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwmMain {
    temp: f64,
    feels_like: Option<f64>,
    pressure: f64,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmWind {
    speed: f64,
    deg: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmClouds {
    all: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwmCondition {
    main: String,
}

impl From<OwmResponse> for WeatherReport {
    fn from(raw: OwmResponse) -> Self {
        let observed_at = raw
            .dt
            .and_then(|dt| DateTime::from_timestamp(dt, 0))
            .unwrap_or_else(Utc::now);
        Self {
            temperature: raw.main.temp,
            feels_like: raw.main.feels_like,
            pressure: raw.main.pressure,
            humidity: raw.main.humidity,
            wind_speed: raw.wind.as_ref().map(|w| w.speed).unwrap_or(0.0),
            wind_direction: raw.wind.as_ref().and_then(|w| w.deg),
            cloud_cover: raw.clouds.and_then(|c| c.all),
            conditions: raw
                .weather
                .into_iter()
                .next()
                .map(|c| c.main)
                .unwrap_or_else(|| "Unknown".to_string()),
            observed_at,
        }
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn current_weather(&self, location: &Location) -> Result<WeatherReport> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(|e| anyhow!("Weather request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Weather request failed: HTTP {} - {}", status, body));
        }

        let raw: OwmResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse weather response: {}", e))?;
        Ok(raw.into())
    }
}
