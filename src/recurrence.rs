//! Recurrence calculator.
//!
//! Pure functions that turn a 12-hour wall-clock string and a recurrence
//! pattern into the next absolute trigger instant. No I/O.
//!
//! All calendar arithmetic happens in one operating timezone. A reminder's
//! trigger is its nominal event instant minus a fixed lead time; the first
//! eligible day (today through a week ahead) whose trigger lies strictly after
//! the reference instant wins.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How many days past the reference date are searched for an eligible day.
pub const LOOKAHEAD_DAYS: u64 = 7;

/// Default lead time between trigger and nominal event.
pub const DEFAULT_LEAD_MINUTES: i64 = 5;

/// Why a trigger instant could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotComputable {
    #[error("invalid time of day {0:?}; expected e.g. \"7:00 AM\"")]
    InvalidTime(String),

    #[error("recurrence pattern is empty")]
    EmptyPattern,

    #[error("unrecognised recurrence pattern {0:?}")]
    InvalidPattern(String),

    #[error("no eligible day within the next week")]
    NoEligibleDay,
}

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

/// Local wall-clock time, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    /// Build from a 24-hour clock value.
    #[must_use]
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Hour on the 24-hour clock.
    #[must_use]
    pub fn hour(self) -> u32 {
        self.hour
    }

    #[must_use]
    pub fn minute(self) -> u32 {
        self.minute
    }

    /// Parse a 12-hour clock string such as `"7:00 AM"`, `"07:03 pm"` or
    /// `"6:00PM"`.
    pub fn parse(raw: &str) -> Result<Self, NotComputable> {
        let invalid = || NotComputable::InvalidTime(raw.to_owned());

        let upper = raw.trim().to_ascii_uppercase();
        let (clock, pm) = if let Some(rest) = upper.strip_suffix("AM") {
            (rest, false)
        } else if let Some(rest) = upper.strip_suffix("PM") {
            (rest, true)
        } else {
            return Err(invalid());
        };

        let (h, m) = clock.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let h: u32 = h.parse().map_err(|_| invalid())?;
        let m: u32 = m.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&h) || m > 59 {
            return Err(invalid());
        }

        let hour = match (h, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        Ok(Self { hour, minute: m })
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h12, suffix) = match self.hour {
            0 => (12, "AM"),
            h @ 1..=11 => (h, "AM"),
            12 => (12, "PM"),
            h => (h - 12, "PM"),
        };
        write!(f, "{h12}:{:02} {suffix}", self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = NotComputable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = NotComputable;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Recurrence pattern
// ---------------------------------------------------------------------------

/// A set of weekdays, Monday first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    #[must_use]
    pub fn contains(self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in calendar order, Monday first.
    pub fn iter(self) -> impl Iterator<Item = Weekday> {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .filter(move |d| self.contains(*d))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = Self::default();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

/// When a task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Recurrence {
    /// Fires once, at the next occurrence of the time of day.
    Once,
    /// Fires every day.
    Everyday,
    /// Fires on the listed weekdays only.
    Weekdays(WeekdaySet),
}

impl Recurrence {
    /// Parse `"Once"`, `"Everyday"`/`"Daily"`, or a comma-separated list of
    /// weekday names (`"Mon,Wed,Fri"`, `"monday, friday"`).
    pub fn parse(raw: &str) -> Result<Self, NotComputable> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NotComputable::EmptyPattern);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "once" => return Ok(Self::Once),
            "everyday" | "every day" | "daily" => return Ok(Self::Everyday),
            _ => {}
        }

        let mut days = WeekdaySet::default();
        for part in trimmed.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let day = Weekday::from_str(part)
                .map_err(|_| NotComputable::InvalidPattern(raw.to_owned()))?;
            days.insert(day);
        }
        if days.is_empty() {
            return Err(NotComputable::EmptyPattern);
        }
        Ok(Self::Weekdays(days))
    }

    /// Whether this pattern repeats after firing.
    #[must_use]
    pub fn is_recurring(self) -> bool {
        !matches!(self, Self::Once)
    }

    /// Whether a day with the given weekday may carry an occurrence.
    #[must_use]
    pub fn allows(self, day: Weekday) -> bool {
        match self {
            Self::Once | Self::Everyday => true,
            Self::Weekdays(days) => days.contains(day),
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => f.write_str("Once"),
            Self::Everyday => f.write_str("Everyday"),
            Self::Weekdays(days) => {
                let names: Vec<String> = days.iter().map(|d| d.to_string()).collect();
                f.write_str(&names.join(","))
            }
        }
    }
}

impl FromStr for Recurrence {
    type Err = NotComputable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Recurrence {
    type Error = NotComputable;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Recurrence> for String {
    fn from(value: Recurrence) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Next-trigger computation
// ---------------------------------------------------------------------------

/// A computed occurrence: when to notify and when the event itself is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    /// Instant the notification should go out (`event_at - lead`).
    pub trigger_at: DateTime<Utc>,
    /// Nominal instant of the event.
    pub event_at: DateTime<Utc>,
}

/// Compute the next occurrence strictly after `reference`.
///
/// Candidate days are the reference's local date plus `0..=LOOKAHEAD_DAYS`.
/// Local times skipped by a DST gap are not eligible; ambiguous local times
/// resolve to the earlier instant.
pub fn next_occurrence(
    time: TimeOfDay,
    pattern: Recurrence,
    lead: TimeDelta,
    reference: DateTime<Utc>,
    tz: Tz,
) -> Result<Occurrence, NotComputable> {
    if let Recurrence::Weekdays(days) = pattern {
        if days.is_empty() {
            return Err(NotComputable::EmptyPattern);
        }
    }

    let today: NaiveDate = reference.with_timezone(&tz).date_naive();
    for offset in 0..=LOOKAHEAD_DAYS {
        let Some(day) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        if !pattern.allows(day.weekday()) {
            continue;
        }
        let Some(naive) = day.and_hms_opt(time.hour(), time.minute(), 0) else {
            continue;
        };
        let Some(local) = tz.from_local_datetime(&naive).earliest() else {
            continue;
        };
        let event_at = local.with_timezone(&Utc);
        let trigger_at = event_at - lead;
        if trigger_at > reference {
            return Ok(Occurrence {
                trigger_at,
                event_at,
            });
        }
    }
    Err(NotComputable::NoEligibleDay)
}

/// Compute the next trigger instant strictly after `reference`, with a lead
/// of `lead_minutes` before the nominal event.
pub fn compute_next_trigger(
    time: TimeOfDay,
    pattern: Recurrence,
    lead_minutes: i64,
    reference: DateTime<Utc>,
    tz: Tz,
) -> Result<DateTime<Utc>, NotComputable> {
    next_occurrence(
        time,
        pattern,
        TimeDelta::minutes(lead_minutes),
        reference,
        tz,
    )
    .map(|o| o.trigger_at)
}
