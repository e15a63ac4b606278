//! SQLite DDL for the almanac store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation. Timestamps are epoch milliseconds.

use rusqlite::Connection;

/// Complete DDL for the almanac database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Concurrent readers alongside one writer, across processes.
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    name         TEXT NOT NULL,
    time_of_day  TEXT NOT NULL,      -- "7:00 AM"
    recurrence   TEXT NOT NULL,      -- "Once" | "Everyday" | "Mon,Wed,Fri"
    status       TEXT NOT NULL DEFAULT 'active',
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL,
    completed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);

CREATE TABLE IF NOT EXISTS scheduled_reminders (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    task_id      TEXT NOT NULL,
    task_name    TEXT NOT NULL,
    task_time    TEXT NOT NULL,
    recurrence   TEXT NOT NULL,
    trigger_at   INTEGER NOT NULL,
    event_at     INTEGER NOT NULL,
    state        TEXT NOT NULL DEFAULT 'pending',
    created_at   INTEGER NOT NULL,
    sent_at      INTEGER,
    last_attempt INTEGER,
    last_error   TEXT
);

CREATE INDEX IF NOT EXISTS idx_reminders_trigger ON scheduled_reminders(state, trigger_at);
CREATE INDEX IF NOT EXISTS idx_reminders_task    ON scheduled_reminders(task_id);
CREATE INDEX IF NOT EXISTS idx_reminders_user    ON scheduled_reminders(user_id);

CREATE TABLE IF NOT EXISTS endpoints (
    user_id        TEXT NOT NULL,
    device_id      TEXT NOT NULL,
    token          TEXT NOT NULL,
    platform       TEXT NOT NULL DEFAULT 'unknown',
    active         INTEGER NOT NULL DEFAULT 1,
    last_seen      INTEGER NOT NULL,
    inactive_since INTEGER,
    updated_at     INTEGER NOT NULL,
    PRIMARY KEY (user_id, device_id)
);

CREATE INDEX IF NOT EXISTS idx_endpoints_token ON endpoints(token);

-- Pre-multi-device registrations, kept as the raw JSON the mobile app wrote.
CREATE TABLE IF NOT EXISTS legacy_tokens (
    user_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY,
    display_name TEXT,
    active       INTEGER NOT NULL DEFAULT 1,
    location     TEXT,
    last_login   INTEGER,
    last_logout  INTEGER
);

CREATE TABLE IF NOT EXISTS alert_cooldowns (
    user_id     TEXT NOT NULL,
    alert_class TEXT NOT NULL,
    notified_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, alert_class)
);

CREATE TABLE IF NOT EXISTS markers (
    name  TEXT PRIMARY KEY,
    at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    kind       TEXT NOT NULL,
    title      TEXT NOT NULL,
    body       TEXT NOT NULL,
    task_id    TEXT,
    created_at INTEGER NOT NULL,
    read       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version on a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = super::types::CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the current schema version, `None` when unset.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
