//! Throttle markers shared by every invocation.
//!
//! A marker is a named timestamp in the store. Claiming it is one conditional
//! update, so of several concurrent claimers at most one wins per interval.
//! Markers only bound cost; per-record claims are what prevent duplicate
//! sends.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Result;
use crate::store::SqliteStore;

/// Marker guarding the due-scan.
pub const DUE_SCAN_MARKER: &str = "due_scan";

/// Marker name guarding one broadcast alert class.
#[must_use]
pub fn broadcast_marker(class: &str) -> String {
    format!("broadcast:{class}")
}

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// This caller owns the current interval.
    Claimed,
    /// Another caller claimed the marker within the interval.
    Throttled { last_at: Option<DateTime<Utc>> },
}

impl ThrottleDecision {
    #[must_use]
    pub fn is_claimed(self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// A named marker with a minimum spacing between claims.
#[derive(Clone)]
pub struct Throttle {
    store: Arc<SqliteStore>,
    name: String,
    min_interval: TimeDelta,
}

impl Throttle {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, name: impl Into<String>, min_interval: TimeDelta) -> Self {
        Self {
            store,
            name: name.into(),
            min_interval,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Claim the marker at `now` unless it was claimed within the interval.
    pub fn try_claim_at(&self, now: DateTime<Utc>) -> Result<ThrottleDecision> {
        if self.store.claim_marker(&self.name, now, self.min_interval)? {
            return Ok(ThrottleDecision::Claimed);
        }
        let last_at = self.store.read_marker(&self.name)?;
        tracing::debug!(marker = %self.name, ?last_at, "throttled");
        Ok(ThrottleDecision::Throttled { last_at })
    }

    /// Stamp the marker at `now` regardless of the interval.
    ///
    /// Used by forced runs so the next unforced run still waits a full
    /// interval.
    pub fn stamp_at(&self, now: DateTime<Utc>) -> Result<()> {
        self.store.claim_marker(&self.name, now, TimeDelta::zero())?;
        Ok(())
    }

    /// Last successful claim.
    pub fn last_claim(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.read_marker(&self.name)?)
    }
}
