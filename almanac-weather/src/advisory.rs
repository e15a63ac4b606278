//! Agronomic advisory rules for mango growers.
//!
//! Thresholds use the rounded Celsius temperature, percent humidity and wind
//! speed in m/s carried by [`WeatherReport`].

use crate::types::{Condition, WeatherReport};

/// Pests and crop risks that current conditions favour, in a stable order.
#[must_use]
pub fn pest_alerts(report: &WeatherReport) -> Vec<&'static str> {
    let t = report.temperature_c;
    let c = report.condition;
    let mut pests = Vec::new();

    if t > 28 && c == Condition::Sunny {
        pests.push("Mango hopper");
    }
    if t > 25 && c == Condition::Cloudy {
        pests.push("Mealybug");
    }
    if (22..=30).contains(&t) && c == Condition::Rainy {
        pests.push("Cecid Fly");
    }
    if c == Condition::Rainy {
        pests.push("Anthracnose");
    }
    if t > 30 {
        pests.push("Leaf Hopper");
    }
    if c == Condition::Rainy && t > 25 {
        pests.push("Fungal diseases");
    }
    if c == Condition::Sunny && t > 32 {
        pests.push("Heat stress");
    }
    if report.humidity > 85 {
        pests.push("Powdery mildew risk");
    }
    if report.wind_speed > 5.0 {
        pests.push("Wind may spread pests");
    }
    pests
}

/// One-line farming advice for the current conditions.
#[must_use]
pub fn farming_advice(report: &WeatherReport) -> String {
    let mut advice = Vec::new();
    match report.condition {
        Condition::Rainy => advice.push("Avoid field work."),
        Condition::Stormy => advice.push("Secure farm equipment."),
        Condition::Sunny | Condition::Cloudy => {}
    }
    if report.temperature_c > 30 {
        advice.push("Water plants early morning.");
    }
    if report.temperature_c < 20 {
        advice.push("Protect sensitive plants.");
    }
    if report.humidity > 85 {
        advice.push("Monitor for fungal diseases.");
    }
    if report.wind_speed > 6.0 {
        advice.push("Check for wind damage.");
    }

    if advice.is_empty() {
        "Normal farming activities.".to_owned()
    } else {
        advice.join(" ")
    }
}

/// Whether conditions warrant an unsolicited pest/severe-weather alert.
#[must_use]
pub fn needs_alert(report: &WeatherReport) -> bool {
    !pest_alerts(report).is_empty()
        || report.condition == Condition::Stormy
        || report.temperature_c > 35
        || report.temperature_c < 15
        || report.wind_speed > 10.0
}
