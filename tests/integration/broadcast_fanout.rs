//! Location-grouped alert broadcasts.

use std::sync::Arc;

use almanac::alerts::{AlertClass, WeatherAlertSource};
use almanac::store::NotificationKind;
use almanac_weather::{CachedProvider, WeatherConfig};
use chrono::TimeDelta;
use chrono_tz::Asia::Manila;

use crate::helpers::{CountingProvider, RecordingGateway, engine, manila, user};

fn weather_engine(
    gateway: Arc<RecordingGateway>,
    provider: Arc<CountingProvider>,
) -> almanac::Engine {
    let cached = CachedProvider::new(provider, &WeatherConfig::default());
    engine(gateway).with_alert_source(Arc::new(WeatherAlertSource::new(cached, Manila)))
}

fn seed_manila_users(engine: &almanac::Engine) {
    let now = manila(2025, 6, 2, 7, 0);
    for (id, location) in [("u1", "Manila"), ("u2", " manila "), ("u3", "MANILA")] {
        engine.store().upsert_user(&user(id, location)).unwrap();
        engine
            .register_endpoint_at(id, "phone", &format!("tok-{id}"), "android", now)
            .unwrap();
    }
}

#[tokio::test]
async fn one_lookup_per_location_and_one_push_per_user() {
    let gateway = Arc::new(RecordingGateway::default());
    let provider = Arc::new(CountingProvider::default());
    let engine = weather_engine(gateway.clone(), provider.clone());
    seed_manila_users(&engine);

    let summary = engine
        .run_broadcast_at(AlertClass::Weather, true, manila(2025, 6, 2, 8, 0))
        .await
        .unwrap();

    assert!(summary.ran);
    assert_eq!(summary.eligible, 3);
    assert_eq!(summary.locations, 1);
    assert_eq!(summary.sent, 3);
    assert_eq!(provider.calls(), 1);
    assert_eq!(gateway.count(), 3);

    let (_, message) = &gateway.sent()[0];
    assert_eq!(message.title, "🌤️ Weather Update: Manila");
    assert_eq!(message.body, "31°C | Rainy");
    assert_eq!(message.data["type"], "weather");

    let inbox = engine.store().list_notifications("u2", 10).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::Weather);
}

#[tokio::test]
async fn cooldown_keeps_users_out_of_the_next_run() {
    let gateway = Arc::new(RecordingGateway::default());
    let provider = Arc::new(CountingProvider::default());
    let engine = weather_engine(gateway.clone(), provider.clone());
    seed_manila_users(&engine);
    let first_run = manila(2025, 6, 2, 8, 0);

    engine
        .run_broadcast_at(AlertClass::Weather, true, first_run)
        .await
        .unwrap();
    let second = engine
        .run_broadcast_at(AlertClass::Weather, true, first_run + TimeDelta::minutes(10))
        .await
        .unwrap();
    assert!(second.ran);
    assert_eq!(second.eligible, 0);
    assert_eq!(gateway.count(), 3);

    let after_cooldown = engine
        .run_broadcast_at(AlertClass::Weather, true, first_run + TimeDelta::minutes(31))
        .await
        .unwrap();
    assert_eq!(after_cooldown.sent, 3);
}

#[tokio::test]
async fn unforced_run_respects_the_guard() {
    let provider = Arc::new(CountingProvider::default());
    let engine = weather_engine(Arc::new(RecordingGateway::default()), provider.clone());
    seed_manila_users(&engine);
    let now = manila(2025, 6, 2, 8, 0);

    assert!(engine.run_broadcast_at(AlertClass::Pest, false, now).await.unwrap().ran);
    let blocked = engine
        .run_broadcast_at(AlertClass::Pest, false, now + TimeDelta::seconds(60))
        .await
        .unwrap();
    assert!(!blocked.ran);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn pest_alert_lists_favoured_pests() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = weather_engine(gateway.clone(), Arc::new(CountingProvider::default()));
    seed_manila_users(&engine);

    let summary = engine
        .run_broadcast_at(AlertClass::Pest, true, manila(2025, 6, 2, 8, 0))
        .await
        .unwrap();
    assert_eq!(summary.sent, 3);
    let (_, message) = &gateway.sent()[0];
    assert_eq!(message.title, "⚠️ Pest Alert: Manila");
    assert!(message.body.contains("Anthracnose"));
}

#[tokio::test]
async fn signed_out_and_unlocated_users_are_not_eligible() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = weather_engine(gateway.clone(), Arc::new(CountingProvider::default()));
    let now = manila(2025, 6, 2, 8, 0);

    let mut signed_out = user("u1", "Manila");
    signed_out.last_login = Some(now - TimeDelta::days(2));
    signed_out.last_logout = Some(now - TimeDelta::days(1));
    let mut nowhere = user("u2", "Manila");
    nowhere.location = Some("   ".into());
    for u in [&signed_out, &nowhere] {
        engine.store().upsert_user(u).unwrap();
        engine
            .register_endpoint_at(&u.id, "phone", &format!("tok-{}", u.id), "ios", now)
            .unwrap();
    }

    let summary = engine
        .run_broadcast_at(AlertClass::Weather, true, now)
        .await
        .unwrap();
    assert_eq!(summary.eligible, 0);
    assert_eq!(gateway.count(), 0);
}
