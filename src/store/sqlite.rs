//! SQLite-backed reminder store.
//!
//! One database file holds tasks, scheduled reminders, the endpoint registry,
//! user profiles, alert cooldowns, throttle markers and the notification
//! inbox. Every multi-writer hazard goes through a conditional `UPDATE` whose
//! affected-row count tells the caller whether it won.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::types::{
    Endpoint, LegacyEndpoint, NotificationKind, NotificationRecord, ReminderState,
    ScheduledReminder, Task, TaskStatus, UserProfile, from_ms, to_ms,
};
use crate::recurrence::{Recurrence, TimeOfDay};

/// How long a writer waits for a competing process to release the lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_COLUMNS: &str =
    "id, user_id, name, time_of_day, recurrence, status, created_at, updated_at, completed_at";

const REMINDER_COLUMNS: &str = "id, user_id, task_id, task_name, task_time, recurrence, \
     trigger_at, event_at, state, created_at, sent_at, last_attempt, last_error";

const ENDPOINT_COLUMNS: &str =
    "user_id, device_id, token, platform, active, last_seen, inactive_since, updated_at";

const USER_COLUMNS: &str = "id, display_name, active, location, last_login, last_logout";

/// Errors from the SQLite store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Outcome of [`SqliteStore::replace_legacy_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyReplace {
    /// The legacy row became a device-map endpoint.
    Migrated,
    /// A more recent registration owns the token; the legacy row was dropped.
    Superseded,
    /// Another writer already handled the legacy row.
    Gone,
}

/// SQLite-backed store.
///
/// Thread-safe via an internal `Mutex<Connection>`. The guard is never held
/// across an `.await`; callers use short synchronous calls.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            params![
                task.id,
                task.user_id,
                task.name,
                task.time.to_string(),
                task.recurrence.to_string(),
                task_status_to_str(task.status),
                to_ms(task.created_at),
                to_ms(task.updated_at),
                task.completed_at.map(to_ms),
            ],
        )?;
        Ok(())
    }

    /// Overwrite a task's mutable fields. Returns `false` when it is gone.
    pub fn update_task(&self, task: &Task) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE tasks SET name = ?2, time_of_day = ?3, recurrence = ?4, status = ?5, \
             updated_at = ?6, completed_at = ?7 WHERE id = ?1",
            params![
                task.id,
                task.name,
                task.time.to_string(),
                task.recurrence.to_string(),
                task_status_to_str(task.status),
                to_ms(task.updated_at),
                task.completed_at.map(to_ms),
            ],
        )?;
        Ok(rows == 1)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.lock()?;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    /// Tasks owned by `user_id`, oldest first.
    pub fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a task and every reminder it owns.
    pub fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM scheduled_reminders WHERE task_id = ?1",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows == 1)
    }

    /// Delete every task and reminder owned by `user_id`. Returns the number
    /// of tasks removed.
    pub fn delete_tasks_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM scheduled_reminders WHERE user_id = ?1",
            params![user_id],
        )?;
        let rows = tx.execute("DELETE FROM tasks WHERE user_id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Scheduled reminders
    // -----------------------------------------------------------------------

    pub fn insert_reminder(&self, reminder: &ScheduledReminder) -> Result<(), StoreError> {
        let conn = self.lock()?;
        insert_reminder_row(&conn, reminder)?;
        Ok(())
    }

    /// Insert `reminder` unless its task already has a pending record.
    ///
    /// Check and insert run in one immediate transaction so two writers
    /// cannot both create a forward-looking record.
    pub fn insert_reminder_if_none_pending(
        &self,
        reminder: &ScheduledReminder,
    ) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM scheduled_reminders WHERE task_id = ?1 AND state = 'pending'",
            params![reminder.task_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(false);
        }
        insert_reminder_row(&tx, reminder)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn get_reminder(&self, id: &str) -> Result<Option<ScheduledReminder>, StoreError> {
        let conn = self.lock()?;
        let reminder = conn
            .query_row(
                &format!("SELECT {REMINDER_COLUMNS} FROM scheduled_reminders WHERE id = ?1"),
                params![id],
                row_to_reminder,
            )
            .optional()?;
        Ok(reminder)
    }

    /// Pending reminders for one task, earliest first.
    pub fn pending_for_task(&self, task_id: &str) -> Result<Vec<ScheduledReminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM scheduled_reminders \
             WHERE task_id = ?1 AND state = 'pending' ORDER BY trigger_at"
        ))?;
        let rows = stmt.query_map(params![task_id], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every reminder for one task, earliest first.
    pub fn reminders_for_task(&self, task_id: &str) -> Result<Vec<ScheduledReminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM scheduled_reminders \
             WHERE task_id = ?1 ORDER BY trigger_at"
        ))?;
        let rows = stmt.query_map(params![task_id], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Pending reminders whose trigger lies in `[from, to]`.
    pub fn pending_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScheduledReminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM scheduled_reminders \
             WHERE state = 'pending' AND trigger_at >= ?1 AND trigger_at <= ?2 \
             ORDER BY trigger_at"
        ))?;
        let rows = stmt.query_map(params![to_ms(from), to_ms(to)], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Pending reminders whose trigger is strictly before `before`.
    pub fn pending_before(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledReminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM scheduled_reminders \
             WHERE state = 'pending' AND trigger_at < ?1 ORDER BY trigger_at"
        ))?;
        let rows = stmt.query_map(params![to_ms(before)], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Conditionally move a reminder from `pending` to `processing`.
    ///
    /// Returns `true` only for the single caller that performed the
    /// transition.
    pub fn claim_reminder(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE scheduled_reminders SET state = 'processing', last_attempt = ?2 \
             WHERE id = ?1 AND state = 'pending'",
            params![id, to_ms(now)],
        )?;
        Ok(rows == 1)
    }

    /// `processing -> sent`.
    pub fn mark_sent(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE scheduled_reminders SET state = 'sent', sent_at = ?2, last_error = NULL \
             WHERE id = ?1 AND state = 'processing'",
            params![id, to_ms(now)],
        )?;
        Ok(rows == 1)
    }

    /// `processing -> failed`, recording the error.
    pub fn mark_failed(
        &self,
        id: &str,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE scheduled_reminders SET state = 'failed', last_attempt = ?2, last_error = ?3 \
             WHERE id = ?1 AND state = 'processing'",
            params![id, to_ms(now), error],
        )?;
        Ok(rows == 1)
    }

    /// `processing` reminders whose claim is older than `claimed_before`.
    pub fn stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledReminder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM scheduled_reminders \
             WHERE state = 'processing' AND COALESCE(last_attempt, 0) < ?1 \
             ORDER BY trigger_at"
        ))?;
        let rows = stmt.query_map(params![to_ms(claimed_before)], row_to_reminder)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// `processing -> failed` for a claim still older than `claimed_before`.
    ///
    /// Returns `true` only for the single caller that recovered the record,
    /// so a live dispatcher that settles it first wins.
    pub fn fail_stale_claim(
        &self,
        id: &str,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE scheduled_reminders SET state = 'failed', last_attempt = ?3, last_error = ?4 \
             WHERE id = ?1 AND state = 'processing' AND COALESCE(last_attempt, 0) < ?2",
            params![id, to_ms(claimed_before), to_ms(now), error],
        )?;
        Ok(rows == 1)
    }

    /// Delete the `pending`/`processing` reminders of a task.
    pub fn delete_open_reminders(&self, task_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM scheduled_reminders \
             WHERE task_id = ?1 AND state IN ('pending', 'processing')",
            params![task_id],
        )?;
        Ok(rows)
    }

    /// Delete every reminder of a task, terminal ones included.
    pub fn delete_reminders_for_task(&self, task_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM scheduled_reminders WHERE task_id = ?1",
            params![task_id],
        )?;
        Ok(rows)
    }

    /// Delete `sent`/`failed` reminders last touched before `before`.
    pub fn purge_terminal(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM scheduled_reminders WHERE state IN ('sent', 'failed') \
             AND COALESCE(sent_at, last_attempt, created_at) < ?1",
            params![to_ms(before)],
        )?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    /// Insert or replace the `(user, device)` endpoint row.
    pub fn upsert_endpoint(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        let conn = self.lock()?;
        upsert_endpoint_row(&conn, endpoint)?;
        Ok(())
    }

    /// Register `endpoint` as the sole owner of its token.
    ///
    /// Any other `(user, device)` row carrying the same token is removed in
    /// the same transaction. Returns how many rows were displaced.
    pub fn claim_token(&self, endpoint: &Endpoint) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let displaced = tx.execute(
            "DELETE FROM endpoints WHERE token = ?1 AND NOT (user_id = ?2 AND device_id = ?3)",
            params![endpoint.token, endpoint.user_id, endpoint.device_id],
        )?;
        upsert_endpoint_row(&tx, endpoint)?;
        tx.commit()?;
        Ok(displaced)
    }

    pub fn get_endpoint(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<Endpoint>, StoreError> {
        let conn = self.lock()?;
        let endpoint = conn
            .query_row(
                &format!(
                    "SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE user_id = ?1 AND device_id = ?2"
                ),
                params![user_id, device_id],
                row_to_endpoint,
            )
            .optional()?;
        Ok(endpoint)
    }

    /// All endpoints of one user, active or not.
    pub fn endpoints_for_user(&self, user_id: &str) -> Result<Vec<Endpoint>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints WHERE user_id = ?1 ORDER BY device_id"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_endpoint)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn all_endpoints(&self) -> Result<Vec<Endpoint>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENDPOINT_COLUMNS} FROM endpoints ORDER BY user_id, device_id"
        ))?;
        let rows = stmt.query_map([], row_to_endpoint)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark an endpoint inactive. Returns `false` when it does not exist.
    pub fn deactivate_endpoint(
        &self,
        user_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE endpoints SET active = 0, \
             inactive_since = COALESCE(inactive_since, ?3), updated_at = ?3 \
             WHERE user_id = ?1 AND device_id = ?2",
            params![user_id, device_id, to_ms(now)],
        )?;
        Ok(rows == 1)
    }

    pub fn delete_endpoint(&self, user_id: &str, device_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM endpoints WHERE user_id = ?1 AND device_id = ?2",
            params![user_id, device_id],
        )?;
        Ok(rows == 1)
    }

    /// Move `last_seen` forward to `now`. Never moves it back.
    pub fn touch_endpoint(
        &self,
        user_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE endpoints SET last_seen = ?3 \
             WHERE user_id = ?1 AND device_id = ?2 AND last_seen < ?3",
            params![user_id, device_id, to_ms(now)],
        )?;
        Ok(rows == 1)
    }

    /// Delete endpoints inactive since before `inactive_before`, or not seen
    /// since before `stale_before`.
    pub fn delete_dormant_endpoints(
        &self,
        inactive_before: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM endpoints WHERE \
             (active = 0 AND COALESCE(inactive_since, updated_at) < ?1) OR last_seen < ?2",
            params![to_ms(inactive_before), to_ms(stale_before)],
        )?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Legacy registrations
    // -----------------------------------------------------------------------

    /// Store a legacy-shape registration. Only fixtures and imports write
    /// these; the engine itself never does.
    pub fn put_legacy_token(
        &self,
        user_id: &str,
        legacy: &LegacyEndpoint,
    ) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(legacy).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.put_legacy_payload(user_id, &payload)
    }

    /// Store a raw legacy payload exactly as the mobile app wrote it.
    pub fn put_legacy_payload(&self, user_id: &str, payload: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO legacy_tokens (user_id, payload) VALUES (?1, ?2)",
            params![user_id, payload],
        )?;
        Ok(())
    }

    /// Read a legacy registration.
    ///
    /// Payloads whose optional fields do not parse still yield the token.
    pub fn get_legacy_token(&self, user_id: &str) -> Result<Option<LegacyEndpoint>, StoreError> {
        let payload: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT payload FROM legacy_tokens WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
        };
        payload.map(|p| parse_legacy_payload(user_id, &p)).transpose()
    }

    pub fn legacy_user_ids(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT user_id FROM legacy_tokens ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_legacy_token(&self, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM legacy_tokens WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(rows == 1)
    }

    /// Atomically replace a user's legacy row with a device-map endpoint.
    ///
    /// The legacy token only displaces other holders of the same token that
    /// were updated before `endpoint.updated_at`. When a holder is at least
    /// as recent, the legacy row is dropped and nothing is written.
    pub fn replace_legacy_with(&self, endpoint: &Endpoint) -> Result<LegacyReplace, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM legacy_tokens WHERE user_id = ?1",
            params![endpoint.user_id],
        )?;
        if removed == 0 {
            return Ok(LegacyReplace::Gone);
        }
        let newer_holders: i64 = tx.query_row(
            "SELECT COUNT(*) FROM endpoints WHERE token = ?1 \
             AND NOT (user_id = ?2 AND device_id = ?3) AND updated_at >= ?4",
            params![
                endpoint.token,
                endpoint.user_id,
                endpoint.device_id,
                to_ms(endpoint.updated_at)
            ],
            |row| row.get(0),
        )?;
        if newer_holders > 0 {
            tx.commit()?;
            return Ok(LegacyReplace::Superseded);
        }
        tx.execute(
            "DELETE FROM endpoints WHERE token = ?1 AND NOT (user_id = ?2 AND device_id = ?3)",
            params![endpoint.token, endpoint.user_id, endpoint.device_id],
        )?;
        upsert_endpoint_row(&tx, endpoint)?;
        tx.commit()?;
        Ok(LegacyReplace::Migrated)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn upsert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                user.id,
                user.display_name,
                user.active,
                user.location,
                user.last_login.map(to_ms),
                user.last_logout.map(to_ms),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<UserProfile>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_user)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Merge profile fields into the user row, creating an active user when
    /// none exists. `None` keeps the stored value; an empty string clears it.
    pub fn merge_user_profile(
        &self,
        id: &str,
        display_name: Option<&str>,
        location: Option<&str>,
        active: Option<bool>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, display_name, active, location) \
             VALUES (?1, NULLIF(?2, ''), COALESCE(?4, 1), NULLIF(?3, '')) \
             ON CONFLICT(id) DO UPDATE SET \
                 display_name = CASE WHEN ?2 IS NULL THEN users.display_name ELSE NULLIF(?2, '') END, \
                 location = CASE WHEN ?3 IS NULL THEN users.location ELSE NULLIF(?3, '') END, \
                 active = COALESCE(?4, users.active)",
            params![id, display_name, location, active],
        )?;
        Ok(())
    }

    /// Stamp `last_login`, creating an active user when none exists.
    pub fn record_login(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, active, last_login) VALUES (?1, 1, ?2) \
             ON CONFLICT(id) DO UPDATE SET last_login = excluded.last_login",
            params![id, to_ms(now)],
        )?;
        Ok(())
    }

    /// Stamp `last_logout`. Returns `false` for an unknown user.
    pub fn record_logout(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE users SET last_logout = ?2 WHERE id = ?1",
            params![id, to_ms(now)],
        )?;
        Ok(rows == 1)
    }

    // -----------------------------------------------------------------------
    // Alert cooldowns
    // -----------------------------------------------------------------------

    pub fn get_cooldown(
        &self,
        user_id: &str,
        alert_class: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let at: Option<i64> = conn
            .query_row(
                "SELECT notified_at FROM alert_cooldowns WHERE user_id = ?1 AND alert_class = ?2",
                params![user_id, alert_class],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at.map(from_ms))
    }

    pub fn set_cooldown(
        &self,
        user_id: &str,
        alert_class: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO alert_cooldowns (user_id, alert_class, notified_at) \
             VALUES (?1, ?2, ?3)",
            params![user_id, alert_class, to_ms(at)],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Throttle markers
    // -----------------------------------------------------------------------

    pub fn read_marker(&self, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let at: Option<i64> = conn
            .query_row(
                "SELECT at_ms FROM markers WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at.map(from_ms))
    }

    /// Claim marker `name` at `now` unless it was claimed after
    /// `now - min_interval`.
    ///
    /// The read and overwrite are a single conditional statement, so of
    /// several concurrent claimers at most one succeeds per interval.
    pub fn claim_marker(
        &self,
        name: &str,
        now: DateTime<Utc>,
        min_interval: chrono::TimeDelta,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let now_ms = to_ms(now);
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO markers (name, at_ms) VALUES (?1, ?2)",
            params![name, now_ms],
        )?;
        if inserted == 1 {
            return Ok(true);
        }
        let cutoff = to_ms(
            now.checked_sub_signed(min_interval)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        );
        let updated = conn.execute(
            "UPDATE markers SET at_ms = ?2 WHERE name = ?1 AND at_ms <= ?3",
            params![name, now_ms, cutoff],
        )?;
        Ok(updated == 1)
    }

    // -----------------------------------------------------------------------
    // Notification inbox
    // -----------------------------------------------------------------------

    pub fn insert_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications (id, user_id, kind, title, body, task_id, created_at, read) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.user_id,
                notification_kind_to_str(record.kind),
                record.title,
                record.body,
                record.task_id,
                to_ms(record.created_at),
                record.read,
            ],
        )?;
        Ok(())
    }

    /// Most recent inbox entries for a user, newest first.
    pub fn list_notifications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, title, body, task_id, created_at, read \
             FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC, id LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![user_id, limit], row_to_notification)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// ---------------------------------------------------------------------------
// Row writers
// ---------------------------------------------------------------------------

fn insert_reminder_row(conn: &Connection, r: &ScheduledReminder) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT INTO scheduled_reminders ({REMINDER_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            r.id,
            r.user_id,
            r.task_id,
            r.task_name,
            r.task_time.to_string(),
            r.recurrence.to_string(),
            to_ms(r.trigger_at),
            to_ms(r.event_at),
            reminder_state_to_str(r.state),
            to_ms(r.created_at),
            r.sent_at.map(to_ms),
            r.last_attempt.map(to_ms),
            r.last_error,
        ],
    )
}

fn upsert_endpoint_row(conn: &Connection, e: &Endpoint) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO endpoints ({ENDPOINT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            e.user_id,
            e.device_id,
            e.token,
            e.platform,
            e.active,
            to_ms(e.last_seen),
            e.inactive_since.map(to_ms),
            to_ms(e.updated_at),
        ],
    )
}

fn parse_legacy_payload(user_id: &str, payload: &str) -> Result<LegacyEndpoint, StoreError> {
    if let Ok(legacy) = serde_json::from_str::<LegacyEndpoint>(payload) {
        return Ok(legacy);
    }
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| StoreError::Corrupt(format!("legacy token for {user_id}: {e}")))?;
    let token = value
        .get("fcmToken")
        .and_then(serde_json::Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| StoreError::Corrupt(format!("legacy token for {user_id} has no fcmToken")))?;
    tracing::debug!(%user_id, "legacy token has non-standard fields; keeping token only");
    Ok(LegacyEndpoint {
        token: token.to_owned(),
        platform: value
            .get("platform")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned),
        user_name: None,
        app_version: None,
        last_updated: None,
        registered_at: None,
    })
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn parse_column<T>(
    idx: usize,
    raw: &str,
    parse: impl Fn(&str) -> Result<T, crate::recurrence::NotComputable>,
) -> rusqlite::Result<T> {
    parse(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let time: String = row.get(3)?;
    let recurrence: String = row.get(4)?;
    let status: String = row.get(5)?;
    let completed_at: Option<i64> = row.get(8)?;

    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        time: parse_column(3, &time, TimeOfDay::parse)?,
        recurrence: parse_column(4, &recurrence, Recurrence::parse)?,
        status: str_to_task_status(&status),
        created_at: from_ms(row.get(6)?),
        updated_at: from_ms(row.get(7)?),
        completed_at: completed_at.map(from_ms),
    })
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledReminder> {
    let time: String = row.get(4)?;
    let recurrence: String = row.get(5)?;
    let state: String = row.get(8)?;
    let sent_at: Option<i64> = row.get(10)?;
    let last_attempt: Option<i64> = row.get(11)?;

    Ok(ScheduledReminder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        task_name: row.get(3)?,
        task_time: parse_column(4, &time, TimeOfDay::parse)?,
        recurrence: parse_column(5, &recurrence, Recurrence::parse)?,
        trigger_at: from_ms(row.get(6)?),
        event_at: from_ms(row.get(7)?),
        state: str_to_reminder_state(&state),
        created_at: from_ms(row.get(9)?),
        sent_at: sent_at.map(from_ms),
        last_attempt: last_attempt.map(from_ms),
        last_error: row.get(12)?,
    })
}

fn row_to_endpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Endpoint> {
    let inactive_since: Option<i64> = row.get(6)?;
    Ok(Endpoint {
        user_id: row.get(0)?,
        device_id: row.get(1)?,
        token: row.get(2)?,
        platform: row.get(3)?,
        active: row.get(4)?,
        last_seen: from_ms(row.get(5)?),
        inactive_since: inactive_since.map(from_ms),
        updated_at: from_ms(row.get(7)?),
    })
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let last_login: Option<i64> = row.get(4)?;
    let last_logout: Option<i64> = row.get(5)?;
    Ok(UserProfile {
        id: row.get(0)?,
        display_name: row.get(1)?,
        active: row.get(2)?,
        location: row.get(3)?,
        last_login: last_login.map(from_ms),
        last_logout: last_logout.map(from_ms),
    })
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let kind: String = row.get(2)?;
    Ok(NotificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: str_to_notification_kind(&kind),
        title: row.get(3)?,
        body: row.get(4)?,
        task_id: row.get(5)?,
        created_at: from_ms(row.get(6)?),
        read: row.get(7)?,
    })
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Active => "active",
        TaskStatus::Complete => "complete",
    }
}

fn str_to_task_status(s: &str) -> TaskStatus {
    match s {
        "complete" => TaskStatus::Complete,
        _ => TaskStatus::Active,
    }
}

fn reminder_state_to_str(state: ReminderState) -> &'static str {
    match state {
        ReminderState::Pending => "pending",
        ReminderState::Processing => "processing",
        ReminderState::Sent => "sent",
        ReminderState::Failed => "failed",
    }
}

fn str_to_reminder_state(s: &str) -> ReminderState {
    match s {
        "processing" => ReminderState::Processing,
        "sent" => ReminderState::Sent,
        "failed" => ReminderState::Failed,
        _ => ReminderState::Pending,
    }
}

fn notification_kind_to_str(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::TaskReminder => "task_reminder",
        NotificationKind::TaskCompleted => "task_completed",
        NotificationKind::TestReminder => "test_reminder",
        NotificationKind::Weather => "weather",
        NotificationKind::Pest => "pest",
    }
}

fn str_to_notification_kind(s: &str) -> NotificationKind {
    match s {
        "task_completed" => NotificationKind::TaskCompleted,
        "test_reminder" => NotificationKind::TestReminder,
        "weather" => NotificationKind::Weather,
        "pest" => NotificationKind::Pest,
        _ => NotificationKind::TaskReminder,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
