//! Fan-out alerts: weather and pest broadcasts to every eligible user.

pub mod broadcast;
pub mod weather;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::config::BroadcastConfig;
use crate::dispatch::PushMessage;
use crate::error::{AlmanacError, Result};
use crate::store::NotificationKind;

pub use broadcast::{BroadcastSummary, Broadcaster};
pub use weather::WeatherAlertSource;

/// Kind of broadcast alert. Each class has its own guard marker and per-user
/// cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertClass {
    /// Current conditions, sent on every run.
    Weather,
    /// Sent only when conditions favour pests or severe weather.
    Pest,
}

impl AlertClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Pest => "pest",
        }
    }

    /// Minimum spacing between two alerts of this class to one user.
    #[must_use]
    pub fn cooldown(self, config: &BroadcastConfig) -> TimeDelta {
        let minutes = match self {
            Self::Weather => config.weather_cooldown_minutes,
            Self::Pest => config.pest_cooldown_minutes,
        };
        i64::try_from(minutes)
            .ok()
            .and_then(TimeDelta::try_minutes)
            .unwrap_or(TimeDelta::MAX)
    }

    #[must_use]
    pub fn notification_kind(self) -> NotificationKind {
        match self {
            Self::Weather => NotificationKind::Weather,
            Self::Pest => NotificationKind::Pest,
        }
    }
}

impl fmt::Display for AlertClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertClass {
    type Err = AlmanacError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weather" => Ok(Self::Weather),
            "pest" | "pests" => Ok(Self::Pest),
            other => Err(AlmanacError::InvalidInput(format!(
                "unknown alert class: {other}"
            ))),
        }
    }
}

/// Produces the message for one location, once per location per run.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Resolve the alert for `location`.
    ///
    /// `Ok(None)` declines: conditions there do not warrant an alert of this
    /// class.
    async fn resolve(&self, class: AlertClass, location: &str) -> Result<Option<PushMessage>>;
}
