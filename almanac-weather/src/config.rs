//! Weather provider configuration with sensible defaults.

use serde::{Deserialize, Serialize};

use crate::error::WeatherError;

/// Environment variable consulted when `api_key` is not set in config.
pub const API_KEY_ENV: &str = "ALMANAC_WEATHER_API_KEY";

/// Configuration for the OpenWeatherMap client and its cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// API base URL (overridden in tests to point at a mock server).
    pub base_url: String,
    /// API key. Falls back to [`API_KEY_ENV`] when `None`.
    pub api_key: Option<String>,
    /// ISO country code appended to every location query.
    pub country_code: String,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// How long a report stays cached, in seconds. 0 disables caching.
    pub cache_ttl_seconds: u64,
    /// Upper bound on distinct cached locations.
    pub cache_capacity: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_owned(),
            api_key: None,
            country_code: "PH".to_owned(),
            timeout_seconds: 10,
            cache_ttl_seconds: 600,
            cache_capacity: 256,
        }
    }
}

impl WeatherConfig {
    /// Validates this configuration.
    ///
    /// Checks that the base URL parses and the timeout is non-zero.
    pub fn validate(&self) -> Result<(), WeatherError> {
        if self.timeout_seconds == 0 {
            return Err(WeatherError::Config(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| WeatherError::Config(format!("invalid base_url: {e}")))?;
        Ok(())
    }

    /// Resolve the API key from config or the environment.
    pub fn resolved_api_key(&self) -> Result<String, WeatherError> {
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.to_owned());
        }
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| WeatherError::Config(format!("no API key configured ({API_KEY_ENV})")))
    }
}
