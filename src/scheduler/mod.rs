//! Due-scan coordination, task lifecycle hooks and recurrence rescheduling.

pub mod authority;
pub mod reschedule;
pub mod runner;
pub mod tasks;

pub use authority::{Throttle, ThrottleDecision};
pub use reschedule::{RescheduleOutcome, Rescheduler, SkipReason};
pub use runner::{BackgroundTicker, DueScanner, ScanSummary};
pub use tasks::{HookOutcome, TaskHooks};
