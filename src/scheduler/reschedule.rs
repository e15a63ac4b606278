//! Recurrence rescheduler: after a recurring occurrence fires, persist the
//! next one.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;

use crate::error::Result;
use crate::recurrence::next_occurrence;
use crate::store::{ScheduledReminder, SqliteStore};

/// Why no follow-up record was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotRecurring,
    TaskMissing,
    TaskComplete,
    /// Another writer already created the forward-looking record.
    AlreadyPending,
    NotComputable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRecurring => f.write_str("task does not recur"),
            Self::TaskMissing => f.write_str("task no longer exists"),
            Self::TaskComplete => f.write_str("task is complete"),
            Self::AlreadyPending => f.write_str("a pending reminder already exists"),
            Self::NotComputable(reason) => write!(f, "next occurrence not computable: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleOutcome {
    Rescheduled(ScheduledReminder),
    Skip(SkipReason),
}

/// Writes the next occurrence of a task after one has fired.
#[derive(Clone)]
pub struct Rescheduler {
    store: Arc<SqliteStore>,
    tz: Tz,
    lead: TimeDelta,
}

impl Rescheduler {
    #[must_use]
    pub fn new(store: Arc<SqliteStore>, tz: Tz, lead: TimeDelta) -> Self {
        Self { store, tz, lead }
    }

    /// Persist the occurrence following `fired`.
    ///
    /// The source task is reloaded so edits made since `fired` was written
    /// take effect. The reference instant is the later of `fired.event_at`
    /// and `now`, so the new record is strictly after the one that fired and
    /// never already overdue. `fired` itself is never modified.
    pub fn reschedule_next(
        &self,
        fired: &ScheduledReminder,
        now: DateTime<Utc>,
    ) -> Result<RescheduleOutcome> {
        if !fired.recurrence.is_recurring() {
            return Ok(RescheduleOutcome::Skip(SkipReason::NotRecurring));
        }
        let Some(task) = self.store.get_task(&fired.task_id)? else {
            return Ok(RescheduleOutcome::Skip(SkipReason::TaskMissing));
        };
        if !task.is_active() {
            return Ok(RescheduleOutcome::Skip(SkipReason::TaskComplete));
        }
        if !task.recurrence.is_recurring() {
            return Ok(RescheduleOutcome::Skip(SkipReason::NotRecurring));
        }

        let reference = fired.event_at.max(now);
        let occurrence = match next_occurrence(task.time, task.recurrence, self.lead, reference, self.tz)
        {
            Ok(occurrence) => occurrence,
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "cannot reschedule task");
                return Ok(RescheduleOutcome::Skip(SkipReason::NotComputable(
                    err.to_string(),
                )));
            }
        };

        let next =
            ScheduledReminder::pending_for(&task, occurrence.trigger_at, occurrence.event_at, now);
        if !self.store.insert_reminder_if_none_pending(&next)? {
            tracing::debug!(task_id = %task.id, "next occurrence already pending");
            return Ok(RescheduleOutcome::Skip(SkipReason::AlreadyPending));
        }
        tracing::debug!(
            task_id = %task.id,
            reminder_id = %next.id,
            trigger_at = %next.trigger_at,
            "rescheduled"
        );
        Ok(RescheduleOutcome::Rescheduled(next))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use chrono::TimeZone;
    use chrono_tz::Asia::Manila;

    use super::*;
    use crate::recurrence::{Recurrence, TimeOfDay};
    use crate::store::{Task, TaskStatus};

    fn manila(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        // 2025-06-02 is a Monday.
        Manila
            .with_ymd_and_hms(2025, 6, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn setup(recurrence: &str) -> (Arc<SqliteStore>, Rescheduler, Task, ScheduledReminder) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let task = Task::new(
            "u1",
            "Water plants",
            TimeOfDay::parse("7:00 AM").unwrap(),
            Recurrence::parse(recurrence).unwrap(),
            manila(2, 6, 0),
        );
        store.insert_task(&task).unwrap();
        let fired = ScheduledReminder::pending_for(&task, manila(2, 6, 55), manila(2, 7, 0), manila(2, 6, 0));
        store.insert_reminder(&fired).unwrap();
        store.claim_reminder(&fired.id, manila(2, 6, 55)).unwrap();
        store.mark_sent(&fired.id, manila(2, 6, 55)).unwrap();
        let rescheduler = Rescheduler::new(store.clone(), Manila, TimeDelta::minutes(5));
        (store, rescheduler, task, fired)
    }

    #[test]
    fn everyday_rolls_to_next_morning() {
        let (store, rescheduler, task, fired) = setup("Everyday");
        let RescheduleOutcome::Rescheduled(next) =
            rescheduler.reschedule_next(&fired, manila(2, 6, 55)).unwrap()
        else {
            panic!("expected a rescheduled record");
        };
        assert_eq!(next.trigger_at, manila(3, 6, 55));
        assert_eq!(next.task_id, task.id);
        assert_eq!(store.pending_for_task(&task.id).unwrap().len(), 1);

        let sent = store.get_reminder(&fired.id).unwrap().unwrap();
        assert_eq!(sent.trigger_at, fired.trigger_at);
    }

    #[test]
    fn second_call_sees_existing_pending_record() {
        let (_, rescheduler, _, fired) = setup("Everyday");
        rescheduler.reschedule_next(&fired, manila(2, 6, 55)).unwrap();
        assert_eq!(
            rescheduler.reschedule_next(&fired, manila(2, 6, 56)).unwrap(),
            RescheduleOutcome::Skip(SkipReason::AlreadyPending)
        );
    }

    #[test]
    fn once_is_not_rescheduled() {
        let (_, rescheduler, _, fired) = setup("Once");
        assert_eq!(
            rescheduler.reschedule_next(&fired, manila(2, 6, 55)).unwrap(),
            RescheduleOutcome::Skip(SkipReason::NotRecurring)
        );
    }

    #[test]
    fn completed_and_deleted_tasks_stop_the_chain() {
        let (store, rescheduler, mut task, fired) = setup("Everyday");
        task.status = TaskStatus::Complete;
        store.update_task(&task).unwrap();
        assert_eq!(
            rescheduler.reschedule_next(&fired, manila(2, 6, 55)).unwrap(),
            RescheduleOutcome::Skip(SkipReason::TaskComplete)
        );

        store.delete_task(&task.id).unwrap();
        assert_eq!(
            rescheduler.reschedule_next(&fired, manila(2, 6, 55)).unwrap(),
            RescheduleOutcome::Skip(SkipReason::TaskMissing)
        );
    }

    #[test]
    fn edited_schedule_takes_effect() {
        let (store, rescheduler, mut task, fired) = setup("Everyday");
        task.recurrence = Recurrence::parse("Fri").unwrap();
        task.time = TimeOfDay::parse("6:00 PM").unwrap();
        store.update_task(&task).unwrap();
        let RescheduleOutcome::Rescheduled(next) =
            rescheduler.reschedule_next(&fired, manila(2, 6, 55)).unwrap()
        else {
            panic!("expected a rescheduled record");
        };
        assert_eq!(next.trigger_at, manila(6, 17, 55));
        assert_eq!(next.recurrence, task.recurrence);
    }

    #[test]
    fn stale_fire_reschedules_into_the_future() {
        let (_, rescheduler, _, fired) = setup("Everyday");
        let RescheduleOutcome::Rescheduled(next) =
            rescheduler.reschedule_next(&fired, manila(5, 12, 0)).unwrap()
        else {
            panic!("expected a rescheduled record");
        };
        assert_eq!(next.trigger_at, manila(6, 6, 55));
    }
}
