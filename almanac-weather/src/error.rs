//! Error types for the almanac-weather crate.
//!
//! Messages never include the API key.

/// Errors that can occur while looking up weather conditions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WeatherError {
    /// The request did not complete within the configured timeout.
    #[error("weather lookup timed out: {0}")]
    Timeout(String),

    /// Transport-level HTTP failure or non-success status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The provider does not know the requested location.
    #[error("location not found: {0}")]
    NotFound(String),

    /// The provider response could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid provider configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Convenience type alias for almanac-weather results.
pub type Result<T> = std::result::Result<T, WeatherError>;

impl From<reqwest::Error> for WeatherError {
    fn from(err: reqwest::Error) -> Self {
        // Strip the URL: it carries the appid query parameter.
        let err = err.without_url();
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = WeatherError::NotFound("Atlantis".into());
        assert_eq!(err.to_string(), "location not found: Atlantis");
    }

    #[test]
    fn display_timeout() {
        let err = WeatherError::Timeout("exceeded 10s".into());
        assert_eq!(err.to_string(), "weather lookup timed out: exceeded 10s");
    }

    #[test]
    fn display_config() {
        let err = WeatherError::Config("api key missing".into());
        assert_eq!(err.to_string(), "config error: api key missing");
    }
}
