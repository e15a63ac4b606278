//! A recurring task walks its reminder chain one occurrence at a time.

use std::sync::Arc;

use almanac::engine::TaskUpdate;
use almanac::scheduler::runner::{ABANDONED_CLAIM_ERROR, MISSED_WINDOW_ERROR};
use almanac::store::ReminderState;

use crate::helpers::{RecordingGateway, engine, manila};

#[tokio::test]
async fn daily_task_rolls_forward_after_each_send() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let monday_8am = manila(2025, 6, 2, 8, 0);

    engine
        .register_endpoint_at("u1", "phone", "tok-1", "android", monday_8am)
        .expect("register");
    let created = engine
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", monday_8am)
        .expect("create");
    let first = created.next_reminder.expect("first reminder");
    assert_eq!(first.trigger_at, manila(2025, 6, 3, 6, 55));
    assert_eq!(first.event_at, manila(2025, 6, 3, 7, 0));

    let tuesday = engine
        .scan_and_dispatch_at(true, manila(2025, 6, 3, 6, 55))
        .await
        .expect("tuesday scan");
    assert_eq!(tuesday.sent, 1);
    assert_eq!(tuesday.rescheduled, 1);

    let pending = engine.store().pending_for_task(&created.task.id).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].trigger_at, manila(2025, 6, 4, 6, 55));

    let wednesday = engine
        .scan_and_dispatch_at(true, manila(2025, 6, 4, 6, 56))
        .await
        .expect("wednesday scan");
    assert_eq!(wednesday.sent, 1);

    let pending = engine.store().pending_for_task(&created.task.id).unwrap();
    assert_eq!(pending[0].trigger_at, manila(2025, 6, 5, 6, 55));

    let sent = gateway.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1.title, "⏰ Task Reminder: Water plants");
    assert_eq!(sent[0].1.body, "Time: 7:00 AM");
    assert_eq!(sent[0].1.data["taskId"], created.task.id);
}

#[tokio::test]
async fn weekday_pattern_skips_to_next_listed_day() {
    let engine = engine(Arc::new(RecordingGateway::default()));
    let created = engine
        .create_task_at("u1", "Spray", "8:00 AM", "Mon,Wed,Fri", manila(2025, 6, 2, 9, 0))
        .unwrap();
    let next = created.next_reminder.unwrap();
    assert_eq!(next.trigger_at, manila(2025, 6, 4, 7, 55));
}

#[tokio::test]
async fn one_shot_task_is_not_rescheduled() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let now = manila(2025, 6, 2, 8, 0);
    engine.register_endpoint_at("u1", "phone", "tok-1", "ios", now).unwrap();
    let created = engine
        .create_task_at("u1", "Harvest", "9:00 AM", "Once", now)
        .unwrap();
    let trigger = created.next_reminder.unwrap().trigger_at;
    assert_eq!(trigger, manila(2025, 6, 2, 8, 55));

    let summary = engine.scan_and_dispatch_at(true, trigger).await.unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.rescheduled, 0);
    assert!(engine.store().pending_for_task(&created.task.id).unwrap().is_empty());
    assert_eq!(gateway.count(), 1);
}

#[tokio::test]
async fn missed_occurrence_fails_and_chain_continues() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let monday = manila(2025, 6, 2, 8, 0);
    engine.register_endpoint_at("u1", "phone", "tok-1", "android", monday).unwrap();
    let created = engine
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", monday)
        .unwrap();

    let late = engine
        .scan_and_dispatch_at(true, manila(2025, 6, 3, 7, 30))
        .await
        .unwrap();
    assert_eq!(late.missed, 1);
    assert_eq!(late.sent, 0);
    assert_eq!(late.rescheduled, 1);
    assert_eq!(gateway.count(), 0);

    let history = engine.store().reminders_for_task(&created.task.id).unwrap();
    let missed = history
        .iter()
        .find(|r| r.state == ReminderState::Failed)
        .expect("failed record");
    assert_eq!(missed.last_error.as_deref(), Some(MISSED_WINDOW_ERROR));
    let pending = engine.store().pending_for_task(&created.task.id).unwrap();
    assert_eq!(pending[0].trigger_at, manila(2025, 6, 4, 6, 55));
}

#[tokio::test]
async fn renamed_task_sends_current_name() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let monday = manila(2025, 6, 2, 8, 0);
    engine.register_endpoint_at("u1", "phone", "tok-1", "android", monday).unwrap();
    let created = engine
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", monday)
        .unwrap();
    let original = created.next_reminder.unwrap();

    let renamed = engine
        .update_task_at(
            "u1",
            &created.task.id,
            TaskUpdate {
                name: Some("Water mangoes".into()),
                ..Default::default()
            },
            manila(2025, 6, 2, 9, 0),
        )
        .unwrap();
    assert_eq!(renamed.removed, 0);
    let pending = engine.store().pending_for_task(&created.task.id).unwrap();
    assert_eq!(pending[0].id, original.id);

    engine
        .scan_and_dispatch_at(true, original.trigger_at)
        .await
        .unwrap();
    assert_eq!(gateway.sent()[0].1.title, "⏰ Task Reminder: Water mangoes");
}

#[tokio::test]
async fn completed_task_stops_reminding() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let monday = manila(2025, 6, 2, 8, 0);
    engine.register_endpoint_at("u1", "phone", "tok-1", "android", monday).unwrap();
    let created = engine
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", monday)
        .unwrap();

    let done = engine
        .complete_task_at("u1", &created.task.id, manila(2025, 6, 2, 10, 0))
        .await
        .unwrap();
    assert_eq!(done.removed, 1);
    assert!(done.notified);
    assert_eq!(gateway.sent()[0].1.title, "✅ Task Completed");

    let tuesday = engine
        .scan_and_dispatch_at(true, manila(2025, 6, 3, 6, 55))
        .await
        .unwrap();
    assert_eq!(tuesday.due, 0);
    assert_eq!(gateway.count(), 1);
}

#[tokio::test]
async fn weekday_evening_task_created_thursday_night_fires_friday() {
    let engine = engine(Arc::new(RecordingGateway::default()));
    let created = engine
        .create_task_at("u1", "Close greenhouse", "6:00 PM", "Mon,Wed,Fri", manila(2025, 6, 5, 19, 0))
        .unwrap();
    let next = created.next_reminder.unwrap();
    assert_eq!(next.trigger_at, manila(2025, 6, 6, 17, 55));
    assert_eq!(next.event_at, manila(2025, 6, 6, 18, 0));
}

#[tokio::test]
async fn chain_survives_a_claim_that_was_never_settled() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let monday_8am = manila(2025, 6, 2, 8, 0);
    engine
        .register_endpoint_at("u1", "phone", "tok-1", "android", monday_8am)
        .unwrap();
    let created = engine
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", monday_8am)
        .unwrap();
    let first = created.next_reminder.unwrap();
    // A dispatcher that crashed after claiming.
    assert!(engine.store().claim_reminder(&first.id, monday_8am).unwrap());

    let mut abandoned = 0;
    for day in 3..=6 {
        for (h, m) in [(6, 55), (12, 0)] {
            let summary = engine
                .scan_and_dispatch_at(true, manila(2025, 6, day, h, m))
                .await
                .unwrap();
            abandoned += summary.abandoned;
            if (day, h) == (3, 6) {
                let stuck = engine.store().get_reminder(&first.id).unwrap().unwrap();
                assert_eq!(stuck.state, ReminderState::Failed);
                assert_eq!(stuck.last_error.as_deref(), Some(ABANDONED_CLAIM_ERROR));
            }
        }
    }
    assert_eq!(abandoned, 1);
    assert_eq!(gateway.count(), 3);
    let pending = engine.store().pending_for_task(&created.task.id).unwrap();
    assert_eq!(pending[0].trigger_at, manila(2025, 6, 7, 6, 55));
}
