//! Alert source backed by a [`WeatherProvider`].

use async_trait::async_trait;
use chrono_tz::Tz;

use almanac_weather::advisory::{farming_advice, needs_alert, pest_alerts};
use almanac_weather::{WeatherProvider, WeatherReport};

use super::{AlertClass, AlertSource};
use crate::dispatch::{CHANNEL_WEATHER_ALERTS, PushMessage};
use crate::error::Result;

/// Builds weather and pest alerts from current conditions.
pub struct WeatherAlertSource<P> {
    provider: P,
    tz: Tz,
}

impl<P: WeatherProvider> WeatherAlertSource<P> {
    /// `tz` is used to render the report time in messages.
    #[must_use]
    pub fn new(provider: P, tz: Tz) -> Self {
        Self { provider, tz }
    }
}

#[async_trait]
impl<P: WeatherProvider> AlertSource for WeatherAlertSource<P> {
    async fn resolve(&self, class: AlertClass, location: &str) -> Result<Option<PushMessage>> {
        let report = self.provider.fetch(location).await?;
        let city = location.trim();
        Ok(match class {
            AlertClass::Weather => Some(weather_message(city, &report, self.tz)),
            AlertClass::Pest if needs_alert(&report) => Some(pest_message(city, &report, self.tz)),
            AlertClass::Pest => {
                tracing::debug!(%city, "conditions do not warrant a pest alert");
                None
            }
        })
    }
}

/// Multi-line report shown in the app's alert detail view.
#[must_use]
pub fn full_report(report: &WeatherReport, tz: Tz) -> String {
    let at = report.fetched_at.with_timezone(&tz).format("%-I:%M %p");
    let mut text = format!(
        "🌡️ {}°C | {}\n💧 {}% | 💨 {}m/s\n⏰ {at}",
        report.temperature_c, report.condition, report.humidity, report.wind_speed
    );
    let pests = pest_alerts(report);
    if pests.is_empty() {
        text.push_str("\n\n✅ No major pest threats");
    } else {
        text.push_str("\n\n⚠️ Pest Alert:");
        for pest in &pests {
            text.push_str("\n• ");
            text.push_str(pest);
        }
    }
    text.push_str("\n\n💡 ");
    text.push_str(&farming_advice(report));
    text
}

/// Current-conditions alert.
#[must_use]
pub fn weather_message(city: &str, report: &WeatherReport, tz: Tz) -> PushMessage {
    with_report_data(
        PushMessage::new(
            format!("🌤️ Weather Update: {city}"),
            format!("{}°C | {}", report.temperature_c, report.condition),
            CHANNEL_WEATHER_ALERTS,
        ),
        "weather",
        city,
        report,
        tz,
    )
}

/// Pest and severe-weather warning.
#[must_use]
pub fn pest_message(city: &str, report: &WeatherReport, tz: Tz) -> PushMessage {
    let pests = pest_alerts(report);
    let body = if pests.is_empty() {
        format!("{}°C | {}: {}", report.temperature_c, report.condition, farming_advice(report))
    } else {
        pests.join(", ")
    };
    with_report_data(
        PushMessage::new(format!("⚠️ Pest Alert: {city}"), body, CHANNEL_WEATHER_ALERTS),
        "pest",
        city,
        report,
        tz,
    )
}

fn with_report_data(
    message: PushMessage,
    kind: &str,
    city: &str,
    report: &WeatherReport,
    tz: Tz,
) -> PushMessage {
    let pests = serde_json::to_string(&pest_alerts(report)).unwrap_or_else(|_| "[]".to_owned());
    message
        .with_data("type", kind)
        .with_data("city", city)
        .with_data("temperature", report.temperature_c.to_string())
        .with_data("condition", report.condition.as_str())
        .with_data("humidity", report.humidity.to_string())
        .with_data("wind_speed", report.wind_speed.to_string())
        .with_data("pests", pests)
        .with_data("timestamp", report.fetched_at.to_rfc3339())
        .with_data("message", full_report(report, tz))
}
