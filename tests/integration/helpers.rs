//! Shared fakes and fixtures for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use almanac::dispatch::{DispatchError, DispatchErrorKind, MessageId, PushGateway, PushMessage};
use almanac::store::{SqliteStore, UserProfile};
use almanac::{AlmanacConfig, Engine};
use almanac_weather::{Condition, WeatherProvider, WeatherReport};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Asia::Manila;

/// Token the recording gateway always rejects as unregistered.
pub(crate) const DEAD_TOKEN: &str = "dead-token";

/// Gateway that records every send and rejects [`DEAD_TOKEN`].
#[derive(Default)]
pub(crate) struct RecordingGateway {
    sent: Mutex<Vec<(String, PushMessage)>>,
}

impl RecordingGateway {
    pub(crate) fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<MessageId, DispatchError> {
        if token == DEAD_TOKEN {
            return Err(DispatchError::new(
                DispatchErrorKind::EndpointInvalid,
                "UNREGISTERED (404)",
            ));
        }
        // Yield so concurrent scans really interleave.
        tokio::task::yield_now().await;
        let mut sent = self.sent.lock().unwrap();
        sent.push((token.to_owned(), message.clone()));
        Ok(MessageId(format!("projects/test/messages/{}", sent.len())))
    }
}

/// Weather provider that counts fetches.
#[derive(Default)]
pub(crate) struct CountingProvider {
    calls: AtomicUsize,
}

impl CountingProvider {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherProvider for CountingProvider {
    async fn fetch(&self, location: &str) -> almanac_weather::Result<WeatherReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(WeatherReport {
            location: location.to_owned(),
            temperature_c: 31,
            condition: Condition::Rainy,
            humidity: 85,
            wind_speed: 3.4,
            raw_condition: "Rain".into(),
            fetched_at: manila(2025, 6, 2, 8, 0),
        })
    }
}

/// A Manila wall-clock instant as UTC.
pub(crate) fn manila(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Manila
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// Engine over an in-memory store with default configuration.
pub(crate) fn engine(gateway: Arc<RecordingGateway>) -> Engine {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    Engine::new(AlmanacConfig::default(), store, gateway).unwrap()
}

/// Active, signed-in user with a location.
pub(crate) fn user(id: &str, location: &str) -> UserProfile {
    UserProfile {
        id: id.to_owned(),
        display_name: None,
        active: true,
        location: Some(location.to_owned()),
        last_login: None,
        last_logout: None,
    }
}
