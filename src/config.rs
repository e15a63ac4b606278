//! Configuration for the reminder and alert engine.
//!
//! Loaded from TOML; every section and field has a default so a partial file
//! (or none at all) yields a working configuration.

use std::path::PathBuf;

use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AlmanacError, Result};

/// Environment variable consulted when `push.access_token` is unset.
pub const FCM_TOKEN_ENV: &str = "ALMANAC_FCM_ACCESS_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlmanacConfig {
    /// Due-scan and recurrence settings.
    pub scheduler: SchedulerConfig,
    /// Endpoint registry pruning horizons.
    pub registry: RegistryConfig,
    /// Fan-out alert job settings.
    pub broadcast: BroadcastConfig,
    /// Push gateway client.
    pub push: PushConfig,
    /// Weather provider client and cache.
    pub weather: almanac_weather::WeatherConfig,
    /// Database location.
    pub store: StoreConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Due-scan coordinator and recurrence calculator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// IANA name of the operating timezone all wall-clock times refer to.
    pub timezone: String,
    /// Minutes between the notification and the nominal event.
    pub lead_minutes: i64,
    /// Minimum spacing between two unforced scans.
    pub scan_interval_secs: u64,
    /// Half-width of the due window around "now".
    pub due_window_secs: u64,
    /// Upper bound on concurrent dispatches within one scan.
    pub max_concurrent_dispatches: usize,
    /// How long `sent`/`failed` records are kept before purging.
    pub terminal_retention_hours: u64,
    /// A `processing` claim older than this is treated as abandoned.
    pub stale_claim_secs: u64,
    /// In-process ticker period. 0 disables the ticker.
    pub background_tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Manila".to_owned(),
            lead_minutes: crate::recurrence::DEFAULT_LEAD_MINUTES,
            scan_interval_secs: 30,
            due_window_secs: 120,
            max_concurrent_dispatches: 16,
            terminal_retention_hours: 72,
            stale_claim_secs: 600,
            background_tick_secs: 0,
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| AlmanacError::Config(format!("unknown timezone {:?}: {e}", self.timezone)))
    }

    #[must_use]
    pub fn lead(&self) -> TimeDelta {
        TimeDelta::minutes(self.lead_minutes)
    }

    #[must_use]
    pub fn scan_interval(&self) -> TimeDelta {
        secs(self.scan_interval_secs)
    }

    #[must_use]
    pub fn due_window(&self) -> TimeDelta {
        secs(self.due_window_secs)
    }

    #[must_use]
    pub fn terminal_retention(&self) -> TimeDelta {
        secs(self.terminal_retention_hours.saturating_mul(3600))
    }

    #[must_use]
    pub fn stale_claim(&self) -> TimeDelta {
        secs(self.stale_claim_secs)
    }
}

/// Endpoint registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Deactivated endpoints older than this are deleted.
    pub inactive_horizon_days: u64,
    /// Endpoints not seen for this long are deleted.
    pub stale_horizon_days: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            inactive_horizon_days: 7,
            stale_horizon_days: 60,
        }
    }
}

/// Fan-out alert job settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Minimum spacing between two unforced runs of the same alert class.
    pub guard_secs: u64,
    /// Per-user cooldown for weather alerts.
    pub weather_cooldown_minutes: u64,
    /// Per-user cooldown for pest alerts.
    pub pest_cooldown_minutes: u64,
    /// Upper bound on concurrent per-user deliveries.
    pub max_concurrent_deliveries: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            guard_secs: 300,
            weather_cooldown_minutes: 30,
            pest_cooldown_minutes: 180,
            max_concurrent_deliveries: 16,
        }
    }
}

/// FCM HTTP v1 client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// API base URL (overridden in tests to point at a mock server).
    pub base_url: String,
    /// Firebase project id.
    pub project_id: String,
    /// Service-account key used to mint and refresh bearer tokens. Falls
    /// back to `GOOGLE_APPLICATION_CREDENTIALS` when neither this nor a fixed
    /// token is set.
    pub service_account_path: Option<PathBuf>,
    /// Fixed bearer token for emulators and manual runs. It is never
    /// refreshed. Falls back to [`FCM_TOKEN_ENV`] when unset.
    pub access_token: Option<String>,
    /// Per-call timeout.
    pub request_timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fcm.googleapis.com".to_owned(),
            project_id: String::new(),
            service_account_path: None,
            access_token: None,
            request_timeout_secs: 10,
        }
    }
}

impl PushConfig {
    /// The fixed bearer token from config or the environment, if any.
    #[must_use]
    pub fn fixed_access_token(&self) -> Option<String> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.trim().is_empty()) {
            return Some(token.to_owned());
        }
        std::env::var(FCM_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

/// Database location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            path: base.join("almanac").join("almanac.db"),
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for a daily-rolling log file. `None` logs to stderr only.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            dir: None,
        }
    }
}

impl AlmanacConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AlmanacError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AlmanacError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/almanac/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("almanac").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("almanac")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/almanac-config/config.toml")
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.tz()?;
        if self.scheduler.lead_minutes < 0 {
            return Err(AlmanacError::Config(
                "scheduler.lead_minutes must not be negative".into(),
            ));
        }
        if self.scheduler.due_window_secs == 0 {
            return Err(AlmanacError::Config(
                "scheduler.due_window_secs must be greater than 0".into(),
            ));
        }
        if self.scheduler.max_concurrent_dispatches == 0 {
            return Err(AlmanacError::Config(
                "scheduler.max_concurrent_dispatches must be greater than 0".into(),
            ));
        }
        if self.push.request_timeout_secs == 0 {
            return Err(AlmanacError::Config(
                "push.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.scheduler.stale_claim_secs <= self.push.request_timeout_secs {
            return Err(AlmanacError::Config(
                "scheduler.stale_claim_secs must exceed push.request_timeout_secs".into(),
            ));
        }
        self.weather.validate()?;
        Ok(())
    }
}

fn secs(n: u64) -> TimeDelta {
    i64::try_from(n)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}
