//! Task lifecycle hooks that keep scheduled reminders in step with tasks.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::Result;
use crate::recurrence::next_occurrence;
use crate::store::{ScheduledReminder, SqliteStore, Task};

/// Effect of a lifecycle hook on the reminder table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HookOutcome {
    /// Open (`pending`/`processing`) records removed.
    pub removed: usize,
    /// The forward-looking record written, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled: Option<ScheduledReminder>,
}

#[derive(Clone)]
pub struct TaskHooks {
    store: Arc<SqliteStore>,
    tz: Tz,
    lead: TimeDelta,
}

impl TaskHooks {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, tz: Tz, lead: TimeDelta) -> Self {
        Self { store, tz, lead }
    }

    /// Write the first pending record for a newly created task.
    pub fn on_task_created_at(&self, task: &Task, now: DateTime<Utc>) -> Result<HookOutcome> {
        Ok(HookOutcome {
            removed: 0,
            scheduled: self.schedule_first(task, now)?,
        })
    }

    /// Re-derive the pending record after an edit.
    ///
    /// When `old` is given and neither the time, pattern nor status changed,
    /// the existing pending record is kept.
    pub fn on_task_updated_at(
        &self,
        task: &Task,
        old: Option<&Task>,
        now: DateTime<Utc>,
    ) -> Result<HookOutcome> {
        let schedule_unchanged = old.is_some_and(|old| {
            old.time == task.time && old.recurrence == task.recurrence && old.status == task.status
        });
        if schedule_unchanged && !self.store.pending_for_task(&task.id)?.is_empty() {
            tracing::debug!(task_id = %task.id, "schedule unchanged, keeping pending reminder");
            return Ok(HookOutcome::default());
        }

        let removed = self.store.delete_open_reminders(&task.id)?;
        let scheduled = if task.is_active() {
            self.schedule_first(task, now)?
        } else {
            None
        };
        Ok(HookOutcome { removed, scheduled })
    }

    /// Drop every reminder record of a deleted task.
    pub fn on_task_deleted(&self, task_id: &str) -> Result<HookOutcome> {
        let removed = self.store.delete_reminders_for_task(task_id)?;
        tracing::debug!(%task_id, removed, "reminders removed for deleted task");
        Ok(HookOutcome {
            removed,
            scheduled: None,
        })
    }

    /// Drop the open records of a completed task; sent history is kept.
    pub fn on_task_completed(&self, task_id: &str) -> Result<HookOutcome> {
        let removed = self.store.delete_open_reminders(task_id)?;
        tracing::debug!(%task_id, removed, "open reminders removed for completed task");
        Ok(HookOutcome {
            removed,
            scheduled: None,
        })
    }

    fn schedule_first(&self, task: &Task, now: DateTime<Utc>) -> Result<Option<ScheduledReminder>> {
        if !task.is_active() {
            return Ok(None);
        }
        let occurrence = match next_occurrence(task.time, task.recurrence, self.lead, now, self.tz) {
            Ok(occurrence) => occurrence,
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "no reminder scheduled");
                return Ok(None);
            }
        };
        let reminder =
            ScheduledReminder::pending_for(task, occurrence.trigger_at, occurrence.event_at, now);
        if !self.store.insert_reminder_if_none_pending(&reminder)? {
            tracing::debug!(task_id = %task.id, "pending reminder already present");
            return Ok(None);
        }
        tracing::info!(
            task_id = %task.id,
            reminder_id = %reminder.id,
            trigger_at = %reminder.trigger_at,
            "reminder scheduled"
        );
        Ok(Some(reminder))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use chrono::TimeZone;
    use chrono_tz::Asia::Manila;

    use super::*;
    use crate::recurrence::{Recurrence, TimeOfDay};
    use crate::store::{ReminderState, TaskStatus};

    fn manila(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Manila
            .with_ymd_and_hms(2025, 6, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn hooks() -> (Arc<SqliteStore>, TaskHooks) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let hooks = TaskHooks::new(store.clone(), Manila, TimeDelta::minutes(5));
        (store, hooks)
    }

    fn task(time: &str, pattern: &str) -> Task {
        Task::new(
            "u1",
            "Water plants",
            TimeOfDay::parse(time).unwrap(),
            Recurrence::parse(pattern).unwrap(),
            manila(2, 8, 0),
        )
    }

    #[test]
    fn created_task_gets_one_pending_record() {
        let (store, hooks) = hooks();
        let task = task("7:00 AM", "Everyday");
        store.insert_task(&task).unwrap();
        let outcome = hooks.on_task_created_at(&task, manila(2, 8, 0)).unwrap();
        let scheduled = outcome.scheduled.unwrap();
        assert_eq!(scheduled.trigger_at, manila(3, 6, 55));
        assert_eq!(scheduled.state, ReminderState::Pending);

        let again = hooks.on_task_created_at(&task, manila(2, 8, 1)).unwrap();
        assert!(again.scheduled.is_none());
        assert_eq!(store.pending_for_task(&task.id).unwrap().len(), 1);
    }

    #[test]
    fn time_change_replaces_pending_record() {
        let (store, hooks) = hooks();
        let old = task("7:00 AM", "Everyday");
        store.insert_task(&old).unwrap();
        hooks.on_task_created_at(&old, manila(2, 8, 0)).unwrap();

        let mut edited = old.clone();
        edited.time = TimeOfDay::parse("9:00 AM").unwrap();
        store.update_task(&edited).unwrap();
        let outcome = hooks
            .on_task_updated_at(&edited, Some(&old), manila(2, 8, 5))
            .unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.scheduled.unwrap().trigger_at, manila(2, 8, 55));
        assert_eq!(store.pending_for_task(&old.id).unwrap().len(), 1);
    }

    #[test]
    fn rename_keeps_pending_record() {
        let (store, hooks) = hooks();
        let old = task("7:00 AM", "Everyday");
        store.insert_task(&old).unwrap();
        let first = hooks.on_task_created_at(&old, manila(2, 8, 0)).unwrap();

        let mut renamed = old.clone();
        renamed.name = "Water mango seedlings".into();
        let outcome = hooks
            .on_task_updated_at(&renamed, Some(&old), manila(2, 8, 5))
            .unwrap();
        assert_eq!(outcome, HookOutcome::default());
        let pending = store.pending_for_task(&old.id).unwrap();
        assert_eq!(pending[0].id, first.scheduled.unwrap().id);
    }

    #[test]
    fn completing_through_update_clears_open_records() {
        let (store, hooks) = hooks();
        let old = task("7:00 AM", "Everyday");
        store.insert_task(&old).unwrap();
        hooks.on_task_created_at(&old, manila(2, 8, 0)).unwrap();

        let mut done = old.clone();
        done.status = TaskStatus::Complete;
        let outcome = hooks
            .on_task_updated_at(&done, Some(&old), manila(2, 8, 5))
            .unwrap();
        assert_eq!(outcome.removed, 1);
        assert!(outcome.scheduled.is_none());
    }

    #[test]
    fn delete_and_complete_hooks_remove_records() {
        let (store, hooks) = hooks();
        let task = task("7:00 AM", "Everyday");
        store.insert_task(&task).unwrap();
        hooks.on_task_created_at(&task, manila(2, 8, 0)).unwrap();
        assert_eq!(hooks.on_task_completed(&task.id).unwrap().removed, 1);
        assert_eq!(hooks.on_task_completed(&task.id).unwrap().removed, 0);

        hooks.on_task_created_at(&task, manila(2, 8, 0)).unwrap();
        assert_eq!(hooks.on_task_deleted(&task.id).unwrap().removed, 1);
        assert!(store.reminders_for_task(&task.id).unwrap().is_empty());
    }
}
