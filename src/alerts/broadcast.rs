//! Fan-out alert job.
//!
//! One run: guard marker, registry hygiene, eligibility, grouping by
//! location, one resolution per location, then per-user delivery. A failing
//! location only skips its own users.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use almanac_weather::location_key;

use super::{AlertClass, AlertSource};
use crate::config::BroadcastConfig;
use crate::dispatch::{Delivery, PushMessage};
use crate::error::Result;
use crate::scheduler::authority::{Throttle, ThrottleDecision, broadcast_marker};
use crate::store::{NotificationRecord, SqliteStore, UserProfile};

/// Counters for one broadcast run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastSummary {
    /// `false` when the guard marker turned the run away.
    pub ran: bool,
    pub eligible: usize,
    /// Users with at least one successful delivery.
    pub sent: usize,
    /// Users whose every delivery attempt failed.
    pub failed: usize,
    /// Users left out: source declined, location failed or no devices.
    pub skipped: usize,
    /// Distinct location keys resolved.
    pub locations: usize,
}

enum UserOutcome {
    Sent,
    Failed,
    Skipped,
}

#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<SqliteStore>,
    delivery: Delivery,
    config: BroadcastConfig,
}

impl Broadcaster {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, delivery: Delivery, config: BroadcastConfig) -> Self {
        Self {
            store,
            delivery,
            config,
        }
    }

    /// Users eligible for `class` at `now`.
    pub fn eligible_users_at(&self, class: AlertClass, now: DateTime<Utc>) -> Result<Vec<UserProfile>> {
        let cooldown_cutoff = now
            .checked_sub_signed(class.cooldown(&self.config))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut eligible = Vec::new();
        for user in self.store.list_users()? {
            if !user.active || !user.is_signed_in() {
                continue;
            }
            if user.location.as_deref().map(location_key).unwrap_or_default().is_empty() {
                continue;
            }
            match self.store.get_cooldown(&user.id, class.as_str())? {
                Some(last) if last > cooldown_cutoff => {
                    debug!(user_id = %user.id, %class, "in cooldown");
                }
                _ => eligible.push(user),
            }
        }
        Ok(eligible)
    }

    /// Run one broadcast of `class`.
    ///
    /// Unless `force`, returns `ran = false` when another run claimed the
    /// class marker within the guard interval.
    pub async fn run_broadcast_at(
        &self,
        class: AlertClass,
        source: &dyn AlertSource,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<BroadcastSummary> {
        let guard = Throttle::new(
            self.store.clone(),
            broadcast_marker(class.as_str()),
            secs(self.config.guard_secs),
        );
        if force {
            guard.stamp_at(now)?;
        } else if let ThrottleDecision::Throttled { .. } = guard.try_claim_at(now)? {
            return Ok(BroadcastSummary::default());
        }

        let registry = self.delivery.registry();
        registry.deduplicate()?;
        registry.prune_inactive_at(now)?;

        let users = self.eligible_users_at(class, now)?;
        let mut summary = BroadcastSummary {
            ran: true,
            eligible: users.len(),
            ..Default::default()
        };

        let mut groups: BTreeMap<String, Vec<UserProfile>> = BTreeMap::new();
        for user in users {
            let key = user.location.as_deref().map(location_key).unwrap_or_default();
            groups.entry(key).or_default().push(user);
        }
        summary.locations = groups.len();

        let resolved = join_all(groups.into_iter().map(|(key, users)| async move {
            let display = users
                .first()
                .and_then(|u| u.location.as_deref())
                .map(str::trim)
                .unwrap_or(key.as_str())
                .to_owned();
            let outcome = source.resolve(class, &display).await;
            (key, users, outcome)
        }))
        .await;

        let mut work: Vec<(UserProfile, PushMessage)> = Vec::new();
        for (key, users, outcome) in resolved {
            match outcome {
                Ok(Some(message)) => {
                    work.extend(users.into_iter().map(|u| (u, message.clone())));
                }
                Ok(None) => {
                    debug!(location = %key, %class, users = users.len(), "source declined");
                    summary.skipped += users.len();
                }
                Err(e) => {
                    warn!(location = %key, %class, error = %e, "location resolution failed");
                    summary.skipped += users.len();
                }
            }
        }

        let outcomes: Vec<UserOutcome> = stream::iter(work)
            .map(|(user, message)| async move { self.deliver(class, &user, &message, now).await })
            .buffer_unordered(self.config.max_concurrent_deliveries.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            match outcome {
                UserOutcome::Sent => summary.sent += 1,
                UserOutcome::Failed => summary.failed += 1,
                UserOutcome::Skipped => summary.skipped += 1,
            }
        }

        info!(
            %class,
            eligible = summary.eligible,
            locations = summary.locations,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            "broadcast complete"
        );
        Ok(summary)
    }

    async fn deliver(
        &self,
        class: AlertClass,
        user: &UserProfile,
        message: &PushMessage,
        now: DateTime<Utc>,
    ) -> UserOutcome {
        let report = match self.delivery.deliver_to_user_at(&user.id, message, now).await {
            Ok(report) => report,
            Err(e) => {
                warn!(user_id = %user.id, %class, error = %e, "broadcast delivery failed");
                return UserOutcome::Failed;
            }
        };
        if report.attempted == 0 {
            return UserOutcome::Skipped;
        }
        if !report.any_delivered() {
            return UserOutcome::Failed;
        }

        if let Err(e) = self.store.set_cooldown(&user.id, class.as_str(), now) {
            warn!(user_id = %user.id, %class, error = %e, "failed to record cooldown");
        }
        let record = NotificationRecord::new(
            &user.id,
            class.notification_kind(),
            message.title.clone(),
            message.body.clone(),
            None,
            now,
        );
        if let Err(e) = self.store.insert_notification(&record) {
            warn!(user_id = %user.id, %class, error = %e, "failed to record notification");
        }
        UserOutcome::Sent
    }
}

fn secs(n: u64) -> TimeDelta {
    i64::try_from(n)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}
