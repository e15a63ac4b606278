//! Provider trait consumed by the alert job.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::WeatherReport;

/// A source of current weather conditions.
///
/// Implementations must be `Send + Sync`; the alert job resolves distinct
/// locations concurrently.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Fetch current conditions for a human-entered location name.
    async fn fetch(&self, location: &str) -> Result<WeatherReport>;
}

#[async_trait]
impl<P: WeatherProvider + ?Sized> WeatherProvider for Arc<P> {
    async fn fetch(&self, location: &str) -> Result<WeatherReport> {
        (**self).fetch(location).await
    }
}
