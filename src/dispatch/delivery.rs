//! Per-user delivery: send one message to every active endpoint of a user.
//!
//! Endpoints the gateway reports as invalid are pruned from the registry and
//! endpoints that accepted a send have their `last_seen` refreshed. Other
//! failures are reported but leave the registry untouched. Registry write
//! errors are logged and never change the report's delivery counts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use super::gateway::{DispatchError, MessageId, PushGateway, PushMessage};
use crate::error::Result;
use crate::registry::Registry;

/// Outcome of one per-user delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Active endpoints a send was attempted to.
    pub attempted: usize,
    pub delivered: usize,
    /// Endpoints removed because the gateway rejected their token.
    pub pruned: usize,
    #[serde(skip)]
    pub errors: Vec<DispatchError>,
    #[serde(skip)]
    pub message_ids: Vec<MessageId>,
}

impl DeliveryReport {
    /// At least one endpoint accepted the message.
    #[must_use]
    pub fn any_delivered(&self) -> bool {
        self.delivered > 0
    }

    /// Short human-readable failure summary for logs and records.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        if self.attempted == 0 {
            return "no active endpoints".to_owned();
        }
        let mut parts: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        parts.dedup();
        parts.join("; ")
    }
}

/// Fans a message out to a user's devices through a [`PushGateway`].
#[derive(Clone)]
pub struct Delivery {
    gateway: Arc<dyn PushGateway>,
    registry: Registry,
    max_concurrent: usize,
}

impl Delivery {
    #[must_use]
    pub fn new(gateway: Arc<dyn PushGateway>, registry: Registry, max_concurrent: usize) -> Self {
        Self {
            gateway,
            registry,
            max_concurrent: max_concurrent.max(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Send `message` to every active endpoint of `user_id`.
    ///
    /// A user with no active endpoints yields an empty report, not an error.
    pub async fn deliver_to_user_at(
        &self,
        user_id: &str,
        message: &PushMessage,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let endpoints = self.registry.active_endpoints_at(user_id, now)?;
        let mut report = DeliveryReport {
            attempted: endpoints.len(),
            ..Default::default()
        };
        if endpoints.is_empty() {
            tracing::debug!(%user_id, "no active endpoints");
            return Ok(report);
        }

        let gateway = &self.gateway;
        let outcomes: Vec<_> = stream::iter(endpoints)
            .map(|endpoint| async move {
                let outcome = gateway.send(&endpoint.token, message).await;
                (endpoint, outcome)
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for (endpoint, outcome) in outcomes {
            match outcome {
                Ok(id) => {
                    report.delivered += 1;
                    report.message_ids.push(id);
                    if let Err(e) =
                        self.registry
                            .mark_seen_at(&endpoint.user_id, &endpoint.device_id, now)
                    {
                        tracing::warn!(
                            %user_id,
                            device_id = %endpoint.device_id,
                            error = %e,
                            "failed to refresh endpoint last_seen"
                        );
                    }
                }
                Err(err) if err.is_endpoint_invalid() => {
                    tracing::info!(
                        %user_id,
                        device_id = %endpoint.device_id,
                        error = %err,
                        "gateway rejected token"
                    );
                    match self.registry.prune_invalid(&endpoint.user_id, &endpoint.device_id) {
                        Ok(true) => report.pruned += 1,
                        Ok(false) => {}
                        Err(e) => tracing::warn!(
                            %user_id,
                            device_id = %endpoint.device_id,
                            error = %e,
                            "failed to prune rejected endpoint"
                        ),
                    }
                    report.errors.push(err);
                }
                Err(err) => {
                    tracing::warn!(
                        %user_id,
                        device_id = %endpoint.device_id,
                        error = %err,
                        "push send failed"
                    );
                    report.errors.push(err);
                }
            }
        }
        Ok(report)
    }
}
