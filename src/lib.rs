//! Almanac: scheduled reminder and alert dispatch engine.
//!
//! Turns human-entered recurrence rules ("7:00 AM", "Mon,Wed,Fri") into
//! concrete trigger instants, persists them in SQLite, discovers which are
//! due on every invocation and pushes exactly one notification per due
//! occurrence through a push gateway.
//!
//! # Architecture
//!
//! - **Recurrence**: pure next-trigger calculation in one operating timezone
//! - **Store**: durable SQLite records with conditional state transitions
//! - **Scheduler**: throttled due-scan, per-record claim, rescheduling
//! - **Dispatch**: push gateway trait, FCM client, per-user fan-out
//! - **Registry**: multi-device endpoints, legacy migration, pruning
//! - **Alerts**: weather/pest broadcasts grouped by location
//! - **Engine / host**: operational surface and NDJSON stdio bridge
//!
//! There is no mandatory daemon: each request runs a throttled scan first,
//! and an optional background ticker drives the same idempotent function.

pub mod alerts;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod host;
pub mod recurrence;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use config::AlmanacConfig;
pub use engine::Engine;
pub use error::{AlmanacError, Result};
pub use recurrence::{Recurrence, TimeOfDay, compute_next_trigger};
