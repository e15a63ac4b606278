//! # almanac-weather
//!
//! Current-conditions lookup for Almanac's broadcast alerts.
//!
//! ## Design
//!
//! - [`WeatherProvider`] is the seam the alert job depends on; tests swap in
//!   in-process fakes.
//! - [`OpenWeatherClient`] talks to the OpenWeatherMap current-weather API
//!   with a bounded per-request timeout.
//! - [`CachedProvider`] wraps any provider with a TTL cache keyed by the
//!   normalised location name, so repeated lookups inside the cache window do
//!   not hit the network.
//! - [`advisory`] turns a [`WeatherReport`] into pest warnings and farming
//!   advice, and decides whether conditions warrant an unsolicited alert.

pub mod advisory;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod openweather;
pub mod provider;
pub mod types;

pub use cache::CachedProvider;
pub use config::WeatherConfig;
pub use error::{Result, WeatherError};
pub use openweather::OpenWeatherClient;
pub use provider::WeatherProvider;
pub use types::{Condition, WeatherReport};

/// Normalise a free-form location name into a lookup key.
///
/// Trims surrounding whitespace, collapses inner runs of whitespace and
/// lowercases, so `" Quezon  City"` and `"quezon city"` share a key.
#[must_use]
pub fn location_key(location: &str) -> String {
    location
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
