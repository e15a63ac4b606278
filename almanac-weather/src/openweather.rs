//! OpenWeatherMap current-weather client.
//!
//! Issues `GET {base_url}/data/2.5/weather?q={location},{country}&units=metric`
//! and maps the response onto a [`WeatherReport`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::WeatherConfig;
use crate::error::{Result, WeatherError};
use crate::http::build_client;
use crate::provider::WeatherProvider;
use crate::types::{Condition, WeatherReport};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    main: ApiMain,
    #[serde(default)]
    weather: Vec<ApiWeather>,
    #[serde(default)]
    wind: Option<ApiWind>,
}

#[derive(Debug, Deserialize)]
struct ApiMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct ApiWeather {
    main: String,
}

#[derive(Debug, Deserialize)]
struct ApiWind {
    speed: f64,
}

/// HTTP client for the OpenWeatherMap API.
pub struct OpenWeatherClient {
    client: reqwest::Client,
    base_url: url::Url,
    api_key: String,
    country_code: String,
}

impl OpenWeatherClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WeatherError::Config`] when the config is invalid or no API
    /// key is available.
    pub fn new(config: &WeatherConfig) -> Result<Self> {
        config.validate()?;
        let base_url = url::Url::parse(&config.base_url)
            .map_err(|e| WeatherError::Config(format!("invalid base_url: {e}")))?;
        Ok(Self {
            client: build_client(config)?,
            base_url,
            api_key: config.resolved_api_key()?,
            country_code: config.country_code.clone(),
        })
    }

    fn request_url(&self, location: &str) -> Result<url::Url> {
        let mut url = self
            .base_url
            .join("data/2.5/weather")
            .map_err(|e| WeatherError::Config(format!("invalid base_url: {e}")))?;
        let query = if self.country_code.is_empty() {
            location.trim().to_owned()
        } else {
            format!("{},{}", location.trim(), self.country_code)
        };
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("appid", &self.api_key)
            .append_pair("units", "metric");
        Ok(url)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherClient {
    async fn fetch(&self, location: &str) -> Result<WeatherReport> {
        if location.trim().is_empty() {
            return Err(WeatherError::NotFound("empty location".into()));
        }
        tracing::debug!(%location, "fetching current weather");

        let response = self.client.get(self.request_url(location)?).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WeatherError::NotFound(location.to_owned()));
        }
        if !status.is_success() {
            return Err(WeatherError::Http(format!(
                "provider returned {status} for {location}"
            )));
        }

        let body: ApiResponse = response.json().await?;
        Ok(into_report(location, body))
    }
}

fn into_report(location: &str, body: ApiResponse) -> WeatherReport {
    let raw_condition = body
        .weather
        .first()
        .map(|w| w.main.clone())
        .unwrap_or_default();
    let wind_speed = body.wind.map_or(0.0, |w| (w.speed * 10.0).round() / 10.0);

    WeatherReport {
        location: location.trim().to_owned(),
        temperature_c: body.main.temp.round() as i32,
        condition: Condition::from_provider(&raw_condition),
        humidity: body.main.humidity.clamp(0.0, 100.0).round() as u8,
        wind_speed,
        raw_condition,
        fetched_at: chrono::Utc::now(),
    }
}
