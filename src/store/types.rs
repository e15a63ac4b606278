//! Record types persisted by the reminder store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::{Recurrence, TimeOfDay};

/// Current schema version stamped into `schema_meta`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Generate a new record identifier.
#[must_use]
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Epoch milliseconds for a timestamp column.
#[must_use]
pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Timestamp from an epoch-millisecond column; out-of-range values clamp to
/// the epoch.
#[must_use]
pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Lifecycle of a user task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Complete,
}

/// A user-owned reminder definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub time: TimeOfDay,
    pub recurrence: Recurrence,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a new active task.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        time: TimeOfDay,
        recurrence: Recurrence,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("task"),
            user_id: user_id.into(),
            name: name.into(),
            time,
            recurrence,
            status: TaskStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Scheduled reminders
// ---------------------------------------------------------------------------

/// Delivery state of one scheduled occurrence.
///
/// Transitions: `pending -> processing -> sent | failed`. Only the caller that
/// wins the `pending -> processing` claim may dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderState {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl ReminderState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// One concrete occurrence of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledReminder {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub task_name: String,
    pub task_time: TimeOfDay,
    pub recurrence: Recurrence,
    /// When the notification should go out.
    pub trigger_at: DateTime<Utc>,
    /// Nominal event instant (`trigger_at` plus lead time).
    pub event_at: DateTime<Utc>,
    pub state: ReminderState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ScheduledReminder {
    /// Build a pending reminder for `task` at the given instants.
    #[must_use]
    pub fn pending_for(
        task: &Task,
        trigger_at: DateTime<Utc>,
        event_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("rem"),
            user_id: task.user_id.clone(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            task_time: task.time,
            recurrence: task.recurrence,
            trigger_at,
            event_at,
            state: ReminderState::Pending,
            created_at: now,
            sent_at: None,
            last_attempt: None,
            last_error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// One device's push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub user_id: String,
    pub device_id: String,
    pub token: String,
    pub platform: String,
    pub active: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactive_since: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Pre-multi-device registry shape: one bare token per user.
///
/// Read and migrated, never written by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEndpoint {
    #[serde(rename = "fcmToken")]
    pub token: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Users, cooldowns, notifications
// ---------------------------------------------------------------------------

/// Profile fields the alert job reads. Owned by user management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub active: bool,
    /// Preferred location for weather alerts (free-form city name).
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_logout: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// A session counts as open unless a logout is newer than the last login.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        match (self.last_login, self.last_logout) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(login), Some(logout)) => login > logout,
        }
    }
}

/// What produced an inbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskReminder,
    TaskCompleted,
    TestReminder,
    Weather,
    Pest,
}

/// In-app inbox entry written for every delivered push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl NotificationRecord {
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
        task_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id("note"),
            user_id: user_id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            task_id,
            created_at: now,
            read: false,
        }
    }
}
