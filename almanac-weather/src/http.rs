//! Shared HTTP client construction.

use std::time::Duration;

use crate::config::WeatherConfig;
use crate::error::WeatherError;

/// User-Agent sent with every provider request.
const USER_AGENT: &str = concat!("almanac-weather/", env!("CARGO_PKG_VERSION"));

/// Build a [`reqwest::Client`] for provider requests.
///
/// The timeout bounds the whole request so one slow location cannot stall a
/// broadcast run.
///
/// # Errors
///
/// Returns [`WeatherError::Http`] if the client cannot be constructed.
pub fn build_client(config: &WeatherConfig) -> Result<reqwest::Client, WeatherError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .connect_timeout(Duration::from_secs(config.timeout_seconds.min(5)))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| WeatherError::Http(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_client_with_default_config() {
        let config = WeatherConfig::default();
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn user_agent_names_the_crate() {
        assert!(USER_AGENT.starts_with("almanac-weather/"));
    }
}
