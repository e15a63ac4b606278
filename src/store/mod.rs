//! Durable record store.
//!
//! Tasks, per-occurrence reminder records, the endpoint registry, user
//! profiles, alert cooldowns, throttle markers and the notification inbox all
//! live in one SQLite database. State transitions that several invocations
//! may race on are conditional updates keyed by record id.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::{LegacyReplace, SqliteStore, StoreError};
pub use types::{
    Endpoint, LegacyEndpoint, NotificationKind, NotificationRecord, ReminderState,
    ScheduledReminder, Task, TaskStatus, UserProfile,
};
