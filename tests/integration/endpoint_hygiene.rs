//! Registry behaviour seen through delivery: pruning, token moves and legacy
//! rows.

use std::sync::Arc;

use almanac::registry::{RegistryEntry, legacy_device_id};
use almanac::store::{LegacyEndpoint, NotificationKind};

use crate::helpers::{DEAD_TOKEN, RecordingGateway, engine, manila};

#[tokio::test]
async fn invalid_token_is_pruned_and_others_still_delivered() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let now = manila(2025, 6, 2, 8, 0);
    engine.register_endpoint_at("u1", "phone", "tok-live", "android", now).unwrap();
    engine.register_endpoint_at("u1", "tablet", DEAD_TOKEN, "android", now).unwrap();
    let task = engine
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", now)
        .unwrap()
        .task;

    let report = engine.send_test_reminder_at("u1", &task.id, now).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.pruned, 1);
    assert!(engine.store().get_endpoint("u1", "tablet").unwrap().is_none());
    assert!(engine.store().get_endpoint("u1", "phone").unwrap().is_some());

    let again = engine.send_test_reminder_at("u1", &task.id, now).await.unwrap();
    assert_eq!(again.attempted, 1);

    let inbox = engine.store().list_notifications("u1", 10).unwrap();
    assert_eq!(inbox.len(), 2);
    assert!(inbox.iter().all(|n| n.kind == NotificationKind::TestReminder));
}

#[tokio::test]
async fn token_registered_by_another_user_moves() {
    let engine = engine(Arc::new(RecordingGateway::default()));
    let now = manila(2025, 6, 2, 8, 0);
    engine.register_endpoint_at("u1", "phone", "shared-tok", "android", now).unwrap();
    engine.register_endpoint_at("u2", "phone", "shared-tok", "android", now).unwrap();

    assert!(engine.store().endpoints_for_user("u1").unwrap().is_empty());
    assert_eq!(engine.store().endpoints_for_user("u2").unwrap().len(), 1);
}

#[tokio::test]
async fn deactivated_device_receives_nothing() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let now = manila(2025, 6, 2, 8, 0);
    engine.register_endpoint_at("u1", "phone", "tok-1", "android", now).unwrap();
    let task = engine
        .create_task_at("u1", "Water plants", "7:00 AM", "Everyday", now)
        .unwrap()
        .task;

    assert!(engine.deactivate_endpoint_at("u1", "phone", now).unwrap());
    let report = engine.send_test_reminder_at("u1", &task.id, now).await.unwrap();
    assert!(!report.any_delivered());
    assert_eq!(report.failure_summary(), "no active endpoints");
    assert_eq!(gateway.count(), 0);
}

#[tokio::test]
async fn legacy_registration_is_migrated_on_delivery() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = engine(gateway.clone());
    let now = manila(2025, 6, 2, 8, 0);
    engine
        .store()
        .put_legacy_token(
            "u1",
            &LegacyEndpoint {
                token: "legacy-tok".into(),
                platform: Some("android".into()),
                user_name: Some("Ana".into()),
                app_version: None,
                last_updated: None,
                registered_at: None,
            },
        )
        .unwrap();
    let task = engine
        .create_task_at("u1", "Prune", "6:00 PM", "Once", now)
        .unwrap()
        .task;

    let report = engine.send_test_reminder_at("u1", &task.id, now).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(gateway.sent()[0].0, "legacy-tok");

    match engine.registry().entry("u1").unwrap() {
        Some(RegistryEntry::DeviceMap(map)) => {
            let device = legacy_device_id("legacy-tok");
            assert_eq!(map.devices[&device].token, "legacy-tok");
            assert_eq!(map.devices[&device].platform, "android");
        }
        other => panic!("expected migrated device map, got {other:?}"),
    }
    assert!(engine.store().get_legacy_token("u1").unwrap().is_none());
}
