//! Push gateway contract.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Android notification channel for task reminders.
pub const CHANNEL_TASK_REMINDERS: &str = "task_reminders";

/// Android notification channel for weather and pest alerts.
pub const CHANNEL_WEATHER_ALERTS: &str = "weather_alerts";

/// A platform-neutral push notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    /// String key/value pairs delivered to the app alongside the alert.
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Android notification channel id.
    pub channel: String,
}

impl PushMessage {
    #[must_use]
    pub fn new(title: impl Into<String>, body: impl Into<String>, channel: &str) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
            channel: channel.to_owned(),
        }
    }

    /// Add one data entry.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Gateway-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a failed send should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchErrorKind {
    /// The token is unregistered or malformed; the endpoint should be pruned.
    EndpointInvalid,
    /// Timeouts, throttling and server-side failures.
    TransientNetwork,
    /// The gateway rejected our credentials.
    Unauthorized,
    Unknown,
}

impl DispatchErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndpointInvalid => "endpoint_invalid",
            Self::TransientNetwork => "transient_network",
            Self::Unauthorized => "unauthorized",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DispatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified push failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct DispatchError {
    pub kind: DispatchErrorKind,
    pub message: String,
}

impl DispatchError {
    #[must_use]
    pub fn new(kind: DispatchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_endpoint_invalid(&self) -> bool {
        self.kind == DispatchErrorKind::EndpointInvalid
    }
}

/// Push delivery contract. New gateways only need to implement this trait.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Send one message to one device token.
    async fn send(&self, token: &str, message: &PushMessage) -> Result<MessageId, DispatchError>;
}
