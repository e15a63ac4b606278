//! Device/endpoint registry and pruner.
//!
//! A user's registration is either the legacy single-token shape or a map of
//! device id to endpoint. Legacy rows are read, migrated on first touch into a
//! single device entry and never written back. A token belongs to at most one
//! `(user, device)` pair.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::RegistryConfig;
use crate::error::{AlmanacError, Result};
use crate::store::{Endpoint, LegacyEndpoint, LegacyReplace, SqliteStore};

/// Prefix of device ids synthesised for migrated legacy tokens.
pub const LEGACY_DEVICE_PREFIX: &str = "legacy-";

/// One user's registration, in whichever shape it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEntry {
    Legacy(LegacyEndpoint),
    DeviceMap(DeviceMap),
}

/// Device id to endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMap {
    pub devices: BTreeMap<String, Endpoint>,
}

impl DeviceMap {
    /// Active endpoints in device-id order.
    pub fn active(&self) -> impl Iterator<Item = &Endpoint> {
        self.devices.values().filter(|e| e.active)
    }
}

/// Stable device id for a legacy token: `legacy-` plus a SHA-256 prefix.
#[must_use]
pub fn legacy_device_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{LEGACY_DEVICE_PREFIX}{hex}")
}

/// Convert a legacy registration into a single-device endpoint.
///
/// `updated_at` carries the legacy timestamp so the token never looks newer
/// than it is; an undated row counts as older than any registration.
#[must_use]
pub fn migrate(user_id: &str, legacy: &LegacyEndpoint, now: DateTime<Utc>) -> Endpoint {
    let stamped = legacy.last_updated.or(legacy.registered_at);
    let last_seen = stamped.unwrap_or(now);
    Endpoint {
        user_id: user_id.to_owned(),
        device_id: legacy_device_id(&legacy.token),
        token: legacy.token.clone(),
        platform: legacy
            .platform
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "unknown".to_owned()),
        active: true,
        last_seen,
        inactive_since: None,
        updated_at: stamped.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

/// Outcome of [`Registry::deduplicate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupSummary {
    /// Distinct tokens that had more than one owner.
    pub tokens: usize,
    /// Rows removed.
    pub merged: usize,
}

/// Registry operations over the store.
#[derive(Clone)]
pub struct Registry {
    store: Arc<SqliteStore>,
    config: RegistryConfig,
}

impl Registry {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    /// Read a user's registration in its stored shape.
    pub fn entry(&self, user_id: &str) -> Result<Option<RegistryEntry>> {
        let endpoints = self.store.endpoints_for_user(user_id)?;
        if !endpoints.is_empty() {
            let devices = endpoints
                .into_iter()
                .map(|e| (e.device_id.clone(), e))
                .collect();
            return Ok(Some(RegistryEntry::DeviceMap(DeviceMap { devices })));
        }
        Ok(self
            .store
            .get_legacy_token(user_id)?
            .map(RegistryEntry::Legacy))
    }

    /// Register (or refresh) a device's token.
    ///
    /// Reactivates the device, bumps `last_seen` and removes the token from
    /// any other `(user, device)` pair.
    pub fn register_endpoint_at(
        &self,
        user_id: &str,
        device_id: &str,
        token: &str,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<Endpoint> {
        require("user_id", user_id)?;
        require("device_id", device_id)?;
        require("token", token)?;

        self.migrate_legacy_at(user_id, now)?;

        let endpoint = Endpoint {
            user_id: user_id.to_owned(),
            device_id: device_id.to_owned(),
            token: token.to_owned(),
            platform: if platform.trim().is_empty() {
                "unknown".to_owned()
            } else {
                platform.trim().to_owned()
            },
            active: true,
            last_seen: now,
            inactive_since: None,
            updated_at: now,
        };
        let displaced = self.store.claim_token(&endpoint)?;
        if displaced > 0 {
            tracing::info!(%user_id, %device_id, displaced, "token moved from another registration");
        }
        tracing::debug!(%user_id, %device_id, "endpoint registered");
        Ok(endpoint)
    }

    /// Mark a device inactive after an explicit logout.
    pub fn deactivate_endpoint_at(
        &self,
        user_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.migrate_legacy_at(user_id, now)?;
        let changed = self.store.deactivate_endpoint(user_id, device_id, now)?;
        if changed {
            tracing::info!(%user_id, %device_id, "endpoint deactivated");
        }
        Ok(changed)
    }

    /// Remove an endpoint the gateway reported as invalid.
    pub fn prune_invalid(&self, user_id: &str, device_id: &str) -> Result<bool> {
        let removed = self.store.delete_endpoint(user_id, device_id)?;
        if removed {
            tracing::info!(%user_id, %device_id, "pruned invalid endpoint");
        }
        Ok(removed)
    }

    /// Record that the gateway accepted a send to this device, keeping it
    /// clear of the stale horizon.
    pub fn mark_seen_at(&self, user_id: &str, device_id: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.store.touch_endpoint(user_id, device_id, now)?)
    }

    /// Keep only the most recently updated `(user, device)` pair per token.
    pub fn deduplicate(&self) -> Result<DedupSummary> {
        let mut by_token: HashMap<String, Vec<Endpoint>> = HashMap::new();
        for endpoint in self.store.all_endpoints()? {
            by_token
                .entry(endpoint.token.clone())
                .or_default()
                .push(endpoint);
        }

        let mut summary = DedupSummary::default();
        for (_, mut owners) in by_token.into_iter().filter(|(_, o)| o.len() > 1) {
            owners.sort_by(|a, b| {
                (b.updated_at, b.last_seen, b.active).cmp(&(a.updated_at, a.last_seen, a.active))
            });
            summary.tokens += 1;
            for stale in owners.iter().skip(1) {
                if self.store.delete_endpoint(&stale.user_id, &stale.device_id)? {
                    summary.merged += 1;
                }
            }
        }
        if summary.merged > 0 {
            tracing::info!(
                tokens = summary.tokens,
                merged = summary.merged,
                "deduplicated endpoint registry"
            );
        }
        Ok(summary)
    }

    /// Rewrite a user's legacy row as a single-device entry.
    ///
    /// Returns `true` when a migration happened.
    pub fn migrate_legacy_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let legacy = match self.store.get_legacy_token(user_id) {
            Ok(Some(legacy)) => legacy,
            Ok(None) => return Ok(false),
            Err(crate::store::StoreError::Corrupt(reason)) => {
                tracing::warn!(%user_id, %reason, "dropping unreadable legacy registration");
                self.store.delete_legacy_token(user_id)?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let endpoint = migrate(user_id, &legacy, now);
        match self.store.replace_legacy_with(&endpoint)? {
            LegacyReplace::Migrated => {
                tracing::info!(%user_id, device_id = %endpoint.device_id, "migrated legacy registration");
                Ok(true)
            }
            LegacyReplace::Superseded => {
                tracing::info!(%user_id, "legacy token owned by a newer registration; dropped");
                Ok(false)
            }
            LegacyReplace::Gone => Ok(false),
        }
    }

    /// Migrate every remaining legacy row.
    pub fn migrate_all_legacy_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut migrated = 0;
        for user_id in self.store.legacy_user_ids()? {
            if self.migrate_legacy_at(&user_id, now)? {
                migrated += 1;
            }
        }
        Ok(migrated)
    }

    /// Delete endpoints deactivated longer than the inactive horizon or not
    /// seen for longer than the stale horizon.
    pub fn prune_inactive_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let inactive_before = cutoff(now, self.config.inactive_horizon_days);
        let stale_before = cutoff(now, self.config.stale_horizon_days);
        let removed = self
            .store
            .delete_dormant_endpoints(inactive_before, stale_before)?;
        if removed > 0 {
            tracing::info!(removed, "pruned dormant endpoints");
        }
        Ok(removed)
    }

    /// Active endpoints for a user, migrating a legacy row on the way.
    pub fn active_endpoints_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Endpoint>> {
        match self.entry(user_id)? {
            None => Ok(Vec::new()),
            Some(RegistryEntry::DeviceMap(map)) => Ok(map.active().cloned().collect()),
            Some(RegistryEntry::Legacy(_)) => {
                self.migrate_legacy_at(user_id, now)?;
                Ok(self
                    .store
                    .endpoints_for_user(user_id)?
                    .into_iter()
                    .filter(|e| e.active)
                    .collect())
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AlmanacError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

fn cutoff(now: DateTime<Utc>, horizon_days: u64) -> DateTime<Utc> {
    i64::try_from(horizon_days)
        .ok()
        .and_then(TimeDelta::try_days)
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
