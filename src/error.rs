//! Error types for the almanac engine.

use crate::dispatch::DispatchError;
use crate::recurrence::NotComputable;
use crate::store::StoreError;

/// Top-level error type for the reminder and alert engine.
#[derive(Debug, thiserror::Error)]
pub enum AlmanacError {
    /// A request carried malformed or missing fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced task, user or endpoint does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A time-of-day or recurrence pattern could not produce a trigger.
    #[error(transparent)]
    Recurrence(#[from] NotComputable),

    /// Durable store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Push gateway failure that was not absorbed by the delivery layer.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Weather provider failure.
    #[error("weather error: {0}")]
    Weather(#[from] almanac_weather::WeatherError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler coordination error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AlmanacError>;
