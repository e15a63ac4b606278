//! Due-scan coordinator.
//!
//! Every invocation (host request or background tick) calls
//! [`DueScanner::scan_and_dispatch_at`]. The `due_scan` marker keeps the
//! scan rate down; the per-record `pending -> processing` claim guarantees
//! that each occurrence is dispatched at most once even when scans overlap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::dispatch::{Delivery, messages};
use crate::error::Result;
use crate::scheduler::authority::{DUE_SCAN_MARKER, Throttle, ThrottleDecision};
use crate::scheduler::reschedule::{RescheduleOutcome, Rescheduler};
use crate::store::{NotificationKind, NotificationRecord, ScheduledReminder, SqliteStore};

/// `last_error` written for occurrences that fell behind the due window.
pub const MISSED_WINDOW_ERROR: &str = "missed due window";

/// `last_error` written for `processing` records whose claimant never settled them.
pub const ABANDONED_CLAIM_ERROR: &str = "abandoned claim";

/// Counters for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// `false` when the throttle marker turned the call away.
    pub scanned: bool,
    /// Pending records found inside the due window.
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    /// Overdue records failed without dispatch.
    pub missed: usize,
    /// Stale `processing` claims failed without dispatch.
    pub abandoned: usize,
    pub rescheduled: usize,
    /// Terminal records deleted by retention.
    pub purged: usize,
}

enum DispatchOutcome {
    /// Another invocation claimed the record first.
    Lost,
    Sent { rescheduled: bool },
    Failed { rescheduled: bool },
}

/// Finds due reminders and dispatches each exactly once.
#[derive(Clone)]
pub struct DueScanner {
    store: Arc<SqliteStore>,
    delivery: Delivery,
    rescheduler: Rescheduler,
    throttle: Throttle,
    window: TimeDelta,
    retention: TimeDelta,
    stale_claim: TimeDelta,
    max_concurrent: usize,
}

impl DueScanner {
    pub fn new(store: Arc<SqliteStore>, delivery: Delivery, config: &SchedulerConfig) -> Result<Self> {
        let rescheduler = Rescheduler::new(store.clone(), config.tz()?, config.lead());
        let throttle = Throttle::new(store.clone(), DUE_SCAN_MARKER, config.scan_interval());
        Ok(Self {
            store,
            delivery,
            rescheduler,
            throttle,
            window: config.due_window(),
            retention: config.terminal_retention(),
            stale_claim: config.stale_claim(),
            max_concurrent: config.max_concurrent_dispatches.max(1),
        })
    }

    /// Scan for due reminders and dispatch them.
    ///
    /// Unless `force`, returns immediately with `scanned = false` when another
    /// scan claimed the marker within the scan interval.
    pub async fn scan_and_dispatch_at(&self, force: bool, now: DateTime<Utc>) -> Result<ScanSummary> {
        if force {
            self.throttle.stamp_at(now)?;
        } else if let ThrottleDecision::Throttled { .. } = self.throttle.try_claim_at(now)? {
            return Ok(ScanSummary::default());
        }

        let mut summary = ScanSummary {
            scanned: true,
            ..Default::default()
        };
        let from = now.checked_sub_signed(self.window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let to = now.checked_add_signed(self.window).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let claimed_before = now
            .checked_sub_signed(self.stale_claim)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        for stuck in self.store.stale_claims(claimed_before)? {
            if !self
                .store
                .fail_stale_claim(&stuck.id, claimed_before, now, ABANDONED_CLAIM_ERROR)?
            {
                continue;
            }
            warn!(
                reminder_id = %stuck.id,
                task_id = %stuck.task_id,
                last_attempt = ?stuck.last_attempt,
                "recovered abandoned claim"
            );
            summary.abandoned += 1;
            if self.reschedule(&stuck, now) {
                summary.rescheduled += 1;
            }
        }

        for overdue in self.store.pending_before(from)? {
            if !self.store.claim_reminder(&overdue.id, now)? {
                continue;
            }
            self.store.mark_failed(&overdue.id, now, MISSED_WINDOW_ERROR)?;
            warn!(
                reminder_id = %overdue.id,
                task_id = %overdue.task_id,
                trigger_at = %overdue.trigger_at,
                "reminder missed its due window"
            );
            summary.missed += 1;
            if self.reschedule(&overdue, now) {
                summary.rescheduled += 1;
            }
        }

        let due = self.store.pending_between(from, to)?;
        summary.due = due.len();
        let outcomes: Vec<_> = stream::iter(due)
            .map(|reminder| async move { self.dispatch_one(reminder, now).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                DispatchOutcome::Lost => {}
                DispatchOutcome::Sent { rescheduled } => {
                    summary.sent += 1;
                    summary.rescheduled += usize::from(rescheduled);
                }
                DispatchOutcome::Failed { rescheduled } => {
                    summary.failed += 1;
                    summary.rescheduled += usize::from(rescheduled);
                }
            }
        }

        let cutoff = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        summary.purged = self.store.purge_terminal(cutoff)?;

        if summary.due > 0 || summary.missed > 0 || summary.abandoned > 0 || summary.purged > 0 {
            info!(
                due = summary.due,
                sent = summary.sent,
                failed = summary.failed,
                missed = summary.missed,
                abandoned = summary.abandoned,
                rescheduled = summary.rescheduled,
                purged = summary.purged,
                "due scan complete"
            );
        } else {
            debug!("due scan found nothing");
        }
        Ok(summary)
    }

    /// Claim, send and settle one record. Errors never escape so sibling
    /// dispatches are unaffected.
    async fn dispatch_one(&self, reminder: ScheduledReminder, now: DateTime<Utc>) -> DispatchOutcome {
        match self.store.claim_reminder(&reminder.id, now) {
            Ok(true) => {}
            Ok(false) => {
                debug!(reminder_id = %reminder.id, "claimed by another scan");
                return DispatchOutcome::Lost;
            }
            Err(e) => {
                error!(reminder_id = %reminder.id, error = %e, "claim failed");
                return DispatchOutcome::Lost;
            }
        }

        let task_name = match self.store.get_task(&reminder.task_id) {
            Ok(Some(task)) => task.name,
            _ => reminder.task_name.clone(),
        };
        let message = messages::task_reminder(
            &reminder.user_id,
            &reminder.task_id,
            &task_name,
            reminder.task_time,
        );

        let result = self
            .delivery
            .deliver_to_user_at(&reminder.user_id, &message, now)
            .await;
        let delivered = match result {
            Ok(report) if report.any_delivered() => Ok(()),
            Ok(report) => Err(report.failure_summary()),
            Err(e) => Err(e.to_string()),
        };

        let sent = match delivered {
            Ok(()) => {
                if let Err(e) = self.store.mark_sent(&reminder.id, now) {
                    error!(reminder_id = %reminder.id, error = %e, "failed to mark reminder sent");
                }
                let record = NotificationRecord::new(
                    &reminder.user_id,
                    NotificationKind::TaskReminder,
                    message.title,
                    message.body,
                    Some(reminder.task_id.clone()),
                    now,
                );
                if let Err(e) = self.store.insert_notification(&record) {
                    error!(reminder_id = %reminder.id, error = %e, "failed to record notification");
                }
                info!(reminder_id = %reminder.id, task_id = %reminder.task_id, "reminder sent");
                true
            }
            Err(reason) => {
                if let Err(e) = self.store.mark_failed(&reminder.id, now, &reason) {
                    error!(reminder_id = %reminder.id, error = %e, "failed to mark reminder failed");
                }
                warn!(reminder_id = %reminder.id, task_id = %reminder.task_id, %reason, "reminder not delivered");
                false
            }
        };

        let rescheduled = self.reschedule(&reminder, now);
        if sent {
            DispatchOutcome::Sent { rescheduled }
        } else {
            DispatchOutcome::Failed { rescheduled }
        }
    }

    fn reschedule(&self, fired: &ScheduledReminder, now: DateTime<Utc>) -> bool {
        match self.rescheduler.reschedule_next(fired, now) {
            Ok(RescheduleOutcome::Rescheduled(_)) => true,
            Ok(RescheduleOutcome::Skip(reason)) => {
                debug!(task_id = %fired.task_id, %reason, "not rescheduled");
                false
            }
            Err(e) => {
                error!(task_id = %fired.task_id, error = %e, "reschedule failed");
                false
            }
        }
    }
}

/// Optional in-process driver that calls the due-scan on a fixed period.
pub struct BackgroundTicker {
    scanner: DueScanner,
    period: Duration,
}

impl BackgroundTicker {
    #[must_use]
    pub fn new(scanner: DueScanner, period: Duration) -> Self {
        Self {
            scanner,
            period: period.max(Duration::from_secs(1)),
        }
    }

    /// Spawn the ticker. The first tick fires immediately.
    pub fn run(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(period_secs = self.period.as_secs(), "background ticker started");
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.scanner.scan_and_dispatch_at(false, Utc::now()).await {
                    error!(error = %e, "background scan failed");
                }
            }
        })
    }
}
