//! Two engine instances sharing one database never double-send.

use std::sync::Arc;

use almanac::store::{ReminderState, SqliteStore};
use almanac::{AlmanacConfig, Engine};

use crate::helpers::{RecordingGateway, manila};

fn shared_engines(gateway: Arc<RecordingGateway>) -> (Engine, Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("almanac.db");
    let open = || {
        let store = Arc::new(SqliteStore::open(&path).expect("open store"));
        Engine::new(AlmanacConfig::default(), store, gateway.clone()).expect("engine")
    };
    let a = open();
    let b = open();
    (a, b, dir)
}

#[tokio::test]
async fn concurrent_forced_scans_send_once() {
    let gateway = Arc::new(RecordingGateway::default());
    let (a, b, _dir) = shared_engines(gateway.clone());
    let monday = manila(2025, 6, 2, 8, 0);

    a.register_endpoint_at("u1", "phone", "tok-1", "android", monday).unwrap();
    let created = a
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", monday)
        .unwrap();

    let due_at = manila(2025, 6, 3, 6, 55);
    let (left, right) = tokio::join!(
        a.scan_and_dispatch_at(true, due_at),
        b.scan_and_dispatch_at(true, due_at),
    );
    let (left, right) = (left.unwrap(), right.unwrap());

    assert_eq!(left.sent + right.sent, 1);
    assert_eq!(gateway.count(), 1);

    let history = b.store().reminders_for_task(&created.task.id).unwrap();
    assert_eq!(
        history.iter().filter(|r| r.state == ReminderState::Sent).count(),
        1
    );
    assert_eq!(
        history.iter().filter(|r| r.state == ReminderState::Pending).count(),
        1
    );
}

#[tokio::test]
async fn rescan_after_send_is_a_no_op() {
    let gateway = Arc::new(RecordingGateway::default());
    let (a, b, _dir) = shared_engines(gateway.clone());
    let monday = manila(2025, 6, 2, 8, 0);
    a.register_endpoint_at("u1", "phone", "tok-1", "android", monday).unwrap();
    a.create_task_at("u1", "Water plants", "7:00 AM", "Everyday", monday)
        .unwrap();

    let due_at = manila(2025, 6, 3, 6, 55);
    let first = a.scan_and_dispatch_at(true, due_at).await.unwrap();
    assert_eq!(first.sent, 1);

    let again = b
        .scan_and_dispatch_at(true, manila(2025, 6, 3, 6, 56))
        .await
        .unwrap();
    assert!(again.scanned);
    assert_eq!(again.sent, 0);
    assert_eq!(gateway.count(), 1);
}

#[tokio::test]
async fn unforced_scan_is_throttled_across_instances() {
    let gateway = Arc::new(RecordingGateway::default());
    let (a, b, _dir) = shared_engines(gateway);
    let now = manila(2025, 6, 2, 8, 0);

    assert!(a.scan_and_dispatch_at(false, now).await.unwrap().scanned);
    let blocked = b
        .scan_and_dispatch_at(false, manila(2025, 6, 2, 8, 0) + chrono::TimeDelta::seconds(10))
        .await
        .unwrap();
    assert!(!blocked.scanned);

    let later = b
        .scan_and_dispatch_at(false, now + chrono::TimeDelta::seconds(31))
        .await
        .unwrap();
    assert!(later.scanned);
}
