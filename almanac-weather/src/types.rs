//! Weather report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse sky condition used by the advisory rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Sunny,
    Cloudy,
    Rainy,
    Stormy,
}

impl Condition {
    /// Map a provider condition group (e.g. `"Rain"`, `"Clouds"`,
    /// `"Thunderstorm"`) onto a coarse condition.
    ///
    /// Drizzle counts as rain; anything unrecognised counts as sunny.
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        let raw = raw.to_ascii_lowercase();
        if raw.contains("thunder") || raw.contains("storm") || raw.contains("squall") {
            Self::Stormy
        } else if raw.contains("rain") || raw.contains("drizzle") {
            Self::Rainy
        } else if raw.contains("cloud") {
            Self::Cloudy
        } else {
            Self::Sunny
        }
    }

    /// Stable display name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunny => "Sunny",
            Self::Cloudy => "Cloudy",
            Self::Rainy => "Rainy",
            Self::Stormy => "Stormy",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current conditions at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// Location name as requested.
    pub location: String,
    /// Temperature in degrees Celsius, rounded to the nearest degree.
    pub temperature_c: i32,
    pub condition: Condition,
    /// Relative humidity in percent.
    pub humidity: u8,
    /// Wind speed in metres per second, one decimal place.
    pub wind_speed: f64,
    /// Provider condition group before normalisation.
    pub raw_condition: String,
    pub fetched_at: DateTime<Utc>,
}
