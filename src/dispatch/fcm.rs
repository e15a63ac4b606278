//! Firebase Cloud Messaging HTTP v1 client.
//!
//! `POST {base_url}/v1/projects/{project_id}/messages:send` with a bearer
//! token resolved for every send. Failures are classified from the HTTP
//! status and the FCM `errorCode` detail.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use serde::Deserialize;
use serde_json::json;

use super::gateway::{DispatchError, DispatchErrorKind, MessageId, PushGateway, PushMessage};
use crate::config::PushConfig;
use crate::error::{AlmanacError, Result};

/// OAuth2 scope required by the FCM send API.
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Supplies the bearer token for each send.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> std::result::Result<String, DispatchError>;
}

/// A token fixed at startup.
pub struct StaticToken(String);

impl StaticToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> std::result::Result<String, DispatchError> {
        Ok(self.0.clone())
    }
}

/// Tokens minted from a service-account key. `gcp_auth` caches each token
/// and mints a new one shortly before it expires.
pub struct ServiceAccountTokens {
    provider: Arc<dyn TokenProvider>,
}

impl ServiceAccountTokens {
    /// Load a service-account key file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let account = CustomServiceAccount::from_file(path).map_err(|e| {
            AlmanacError::Config(format!("cannot load service account {}: {e}", path.display()))
        })?;
        Ok(Self {
            provider: Arc::new(account),
        })
    }

    /// Load the key named by `GOOGLE_APPLICATION_CREDENTIALS`, if set.
    pub fn from_env() -> Result<Option<Self>> {
        let account = CustomServiceAccount::from_env()
            .map_err(|e| AlmanacError::Config(format!("cannot load service account: {e}")))?;
        Ok(account.map(|account| Self {
            provider: Arc::new(account),
        }))
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> std::result::Result<String, DispatchError> {
        let token = self.provider.token(&[FCM_SCOPE]).await.map_err(|e| {
            DispatchError::new(
                DispatchErrorKind::Unauthorized,
                format!("failed to mint access token: {e}"),
            )
        })?;
        Ok(token.as_str().to_owned())
    }
}

/// FCM v1 push gateway.
pub struct FcmGateway {
    client: reqwest::Client,
    send_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

impl FcmGateway {
    /// Build a gateway from configuration.
    ///
    /// Credentials are taken from `push.service_account_path`, then a fixed
    /// token, then `GOOGLE_APPLICATION_CREDENTIALS`.
    ///
    /// # Errors
    ///
    /// Returns [`AlmanacError::Config`] when the project id or credentials
    /// are missing, or the HTTP client cannot be built.
    pub fn new(config: &PushConfig) -> Result<Self> {
        let tokens = token_source(config)?;
        Self::with_token_source(config, tokens)
    }

    /// Build a gateway that asks `tokens` for a bearer token on every send.
    pub fn with_token_source(config: &PushConfig, tokens: Arc<dyn AccessTokenSource>) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            return Err(AlmanacError::Config("push.project_id is empty".into()));
        }
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| AlmanacError::Config(format!("failed to build HTTP client: {e}")))?;
        let send_url = format!(
            "{}/v1/projects/{}/messages:send",
            config.base_url.trim_end_matches('/'),
            config.project_id.trim()
        );
        Ok(Self {
            client,
            send_url,
            tokens,
        })
    }
}

fn token_source(config: &PushConfig) -> Result<Arc<dyn AccessTokenSource>> {
    if let Some(path) = &config.service_account_path {
        tracing::info!(path = %path.display(), "push tokens minted from service account");
        return Ok(Arc::new(ServiceAccountTokens::from_file(path)?));
    }
    if let Some(token) = config.fixed_access_token() {
        tracing::warn!("using a fixed push access token; it will not be refreshed");
        return Ok(Arc::new(StaticToken::new(token)));
    }
    match ServiceAccountTokens::from_env()? {
        Some(tokens) => Ok(Arc::new(tokens)),
        None => Err(AlmanacError::Config(format!(
            "no push credentials configured (push.service_account_path, \
             GOOGLE_APPLICATION_CREDENTIALS or {})",
            crate::config::FCM_TOKEN_ENV
        ))),
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send(&self, token: &str, message: &PushMessage) -> std::result::Result<MessageId, DispatchError> {
        let access_token = self.tokens.access_token().await?;
        let body = build_request_body(token, message);
        let response = self
            .client
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = classify_error(status.as_u16(), &text);
            tracing::debug!(status = %status, kind = %err.kind, "push send rejected");
            return Err(err);
        }

        let parsed: SendResponse = response.json().await.map_err(|e| {
            DispatchError::new(
                DispatchErrorKind::Unknown,
                format!("unreadable send response: {}", e.without_url()),
            )
        })?;
        Ok(MessageId(parsed.name))
    }
}

/// Build the FCM v1 `messages:send` request body.
fn build_request_body(token: &str, message: &PushMessage) -> serde_json::Value {
    json!({
        "message": {
            "token": token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
            "android": {
                "priority": "high",
                "notification": {
                    "channel_id": message.channel,
                    "sound": "default",
                },
            },
            "apns": {
                "payload": {
                    "aps": { "sound": "default", "badge": 1 },
                },
            },
        }
    })
}

fn map_transport_error(err: reqwest::Error) -> DispatchError {
    let err = err.without_url();
    let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
        DispatchErrorKind::TransientNetwork
    } else {
        DispatchErrorKind::Unknown
    };
    DispatchError::new(kind, err.to_string())
}

/// Classify an FCM error response.
///
/// The `errorCode` detail wins over the canonical status, which wins over the
/// bare HTTP status.
fn classify_error(http_status: u16, body: &str) -> DispatchError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let error_code = parsed
        .error
        .details
        .iter()
        .find_map(|d| d.error_code.as_deref())
        .unwrap_or("");
    let status = parsed.error.status.as_str();

    let kind = match_code(error_code)
        .or_else(|| match_code(status))
        .unwrap_or(match http_status {
            401 | 403 => DispatchErrorKind::Unauthorized,
            404 => DispatchErrorKind::EndpointInvalid,
            429 | 500..=599 => DispatchErrorKind::TransientNetwork,
            _ => DispatchErrorKind::Unknown,
        });

    let label = if !error_code.is_empty() {
        error_code
    } else if !status.is_empty() {
        status
    } else {
        "HTTP error"
    };
    let message = if parsed.error.message.is_empty() {
        format!("{label} ({http_status})")
    } else {
        format!("{label} ({http_status}): {}", parsed.error.message)
    };
    DispatchError::new(kind, message)
}

fn match_code(code: &str) -> Option<DispatchErrorKind> {
    match code {
        "UNREGISTERED" | "INVALID_ARGUMENT" | "SENDER_ID_MISMATCH" => {
            Some(DispatchErrorKind::EndpointInvalid)
        }
        "THIRD_PARTY_AUTH_ERROR" | "UNAUTHENTICATED" | "PERMISSION_DENIED" => {
            Some(DispatchErrorKind::Unauthorized)
        }
        "UNAVAILABLE" | "INTERNAL" | "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => {
            Some(DispatchErrorKind::TransientNetwork)
        }
        _ => None,
    }
}
