//! Notification payloads for task events.

use super::gateway::{CHANNEL_TASK_REMINDERS, PushMessage};
use crate::recurrence::TimeOfDay;

/// Reminder for one task occurrence.
#[must_use]
pub fn task_reminder(user_id: &str, task_id: &str, task_name: &str, time: TimeOfDay) -> PushMessage {
    let time = time.to_string();
    PushMessage::new(
        format!("⏰ Task Reminder: {task_name}"),
        format!("Time: {time}"),
        CHANNEL_TASK_REMINDERS,
    )
    .with_data("type", "task_reminder")
    .with_data("taskId", task_id)
    .with_data("taskName", task_name)
    .with_data("taskTime", time)
    .with_data("userId", user_id)
    .with_data("click_action", "TASK_ACTIVITY")
}

/// Confirmation after a task is marked complete.
#[must_use]
pub fn task_completed(user_id: &str, task_id: &str, task_name: &str) -> PushMessage {
    PushMessage::new(
        "✅ Task Completed",
        format!("Great job on: {task_name}"),
        CHANNEL_TASK_REMINDERS,
    )
    .with_data("type", "task_completed")
    .with_data("taskId", task_id)
    .with_data("taskName", task_name)
    .with_data("userId", user_id)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn reminder_matches_app_contract() {
        let msg = task_reminder("u1", "task-1", "Water plants", TimeOfDay::new(7, 0).unwrap());
        assert_eq!(msg.title, "⏰ Task Reminder: Water plants");
        assert_eq!(msg.body, "Time: 7:00 AM");
        assert_eq!(msg.channel, "task_reminders");
        assert_eq!(msg.data["type"], "task_reminder");
        assert_eq!(msg.data["taskTime"], "7:00 AM");
        assert_eq!(msg.data["click_action"], "TASK_ACTIVITY");
    }

    #[test]
    fn completion_message_names_task() {
        let msg = task_completed("u1", "task-1", "Prune trees");
        assert_eq!(msg.body, "Great job on: Prune trees");
        assert_eq!(msg.data["type"], "task_completed");
    }
}
