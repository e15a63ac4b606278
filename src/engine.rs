//! Operational surface of the reminder and alert engine.
//!
//! Every operation takes the caller's user id and has an `_at(now)` variant;
//! the plain variants use the wall clock. Tasks owned by another user are
//! reported as not found.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use almanac_weather::{CachedProvider, OpenWeatherClient};

use crate::alerts::{AlertClass, AlertSource, BroadcastSummary, Broadcaster, WeatherAlertSource};
use crate::config::AlmanacConfig;
use crate::dispatch::{Delivery, DeliveryReport, FcmGateway, PushGateway, PushMessage, messages};
use crate::error::{AlmanacError, Result};
use crate::recurrence::{Recurrence, TimeOfDay};
use crate::registry::Registry;
use crate::scheduler::{BackgroundTicker, DueScanner, HookOutcome, ScanSummary, TaskHooks};
use crate::store::{
    Endpoint, NotificationKind, NotificationRecord, ScheduledReminder, SqliteStore, Task,
    TaskStatus, UserProfile,
};

/// Fields a task update may change. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub time: Option<String>,
    pub recurrence: Option<String>,
}

/// Profile fields a user may change. `None` leaves the field as is; an
/// empty location clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub location: Option<String>,
    pub active: Option<bool>,
}

/// Result of creating or editing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task: Task,
    /// Open reminder records replaced by the edit.
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reminder: Option<ScheduledReminder>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub tasks: usize,
    pub reminders: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompleteOutcome {
    pub task: Task,
    pub removed: usize,
    /// Whether the "Task Completed" confirmation reached a device.
    pub notified: bool,
}

/// The engine: tasks, reminders, endpoints and broadcasts over one store.
pub struct Engine {
    config: AlmanacConfig,
    tz: Tz,
    store: Arc<SqliteStore>,
    delivery: Delivery,
    hooks: TaskHooks,
    scanner: DueScanner,
    broadcaster: Broadcaster,
    alert_source: Option<Arc<dyn AlertSource>>,
}

impl Engine {
    /// Assemble an engine over an open store and a push gateway.
    pub fn new(
        config: AlmanacConfig,
        store: Arc<SqliteStore>,
        gateway: Arc<dyn PushGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let tz = config.scheduler.tz()?;
        let registry = Registry::new(store.clone(), config.registry.clone());
        let delivery = Delivery::new(
            gateway,
            registry,
            config.scheduler.max_concurrent_dispatches,
        );
        let hooks = TaskHooks::new(store.clone(), tz, config.scheduler.lead());
        let scanner = DueScanner::new(store.clone(), delivery.clone(), &config.scheduler)?;
        let broadcaster = Broadcaster::new(store.clone(), delivery.clone(), config.broadcast.clone());
        Ok(Self {
            config,
            tz,
            store,
            delivery,
            hooks,
            scanner,
            broadcaster,
            alert_source: None,
        })
    }

    /// Use `source` for broadcast runs.
    #[must_use]
    pub fn with_alert_source(mut self, source: Arc<dyn AlertSource>) -> Self {
        self.alert_source = Some(source);
        self
    }

    /// Build the production engine: SQLite at the configured path, the FCM
    /// gateway and, when an API key is available, cached OpenWeatherMap
    /// alerts.
    pub fn from_config(config: AlmanacConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.store.path)?);
        let gateway: Arc<dyn PushGateway> = Arc::new(FcmGateway::new(&config.push)?);
        let weather = OpenWeatherClient::new(&config.weather);
        let tz = config.scheduler.tz()?;
        let engine = Self::new(config, store, gateway)?;
        match weather {
            Ok(client) => {
                let provider = CachedProvider::new(client, &engine.config.weather);
                Ok(engine.with_alert_source(Arc::new(WeatherAlertSource::new(provider, tz))))
            }
            Err(e) => {
                tracing::warn!(error = %e, "weather alerts disabled");
                Ok(engine)
            }
        }
    }

    #[must_use]
    pub fn config(&self) -> &AlmanacConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        self.delivery.registry()
    }

    /// A ticker driving the due-scan every `scheduler.background_tick_secs`,
    /// or `None` when the ticker is disabled.
    #[must_use]
    pub fn background_ticker(&self) -> Option<BackgroundTicker> {
        let secs = self.config.scheduler.background_tick_secs;
        (secs > 0).then(|| {
            BackgroundTicker::new(self.scanner.clone(), std::time::Duration::from_secs(secs))
        })
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn create_task(&self, user_id: &str, name: &str, time: &str, recurrence: &str) -> Result<TaskOutcome> {
        self.create_task_at(user_id, name, time, recurrence, Utc::now())
    }

    /// Validate and store a new task, then schedule its first reminder.
    pub fn create_task_at(
        &self,
        user_id: &str,
        name: &str,
        time: &str,
        recurrence: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        require("user_id", user_id)?;
        let name = required_name(name)?;
        let time = parse_time(time)?;
        let recurrence = parse_recurrence(recurrence)?;

        let task = Task::new(user_id, name, time, recurrence, now);
        self.store.insert_task(&task)?;
        tracing::info!(task_id = %task.id, %user_id, "task created");
        let hook = self.hooks.on_task_created_at(&task, now)?;
        Ok(TaskOutcome {
            task,
            removed: 0,
            next_reminder: hook.scheduled,
        })
    }

    pub fn update_task(&self, user_id: &str, task_id: &str, update: TaskUpdate) -> Result<TaskOutcome> {
        self.update_task_at(user_id, task_id, update, Utc::now())
    }

    /// Apply `update` and re-derive the pending reminder.
    pub fn update_task_at(
        &self,
        user_id: &str,
        task_id: &str,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let old = self.owned_task(user_id, task_id)?;
        let mut task = old.clone();
        if let Some(name) = update.name.as_deref() {
            task.name = required_name(name)?;
        }
        if let Some(time) = update.time.as_deref() {
            task.time = parse_time(time)?;
        }
        if let Some(recurrence) = update.recurrence.as_deref() {
            task.recurrence = parse_recurrence(recurrence)?;
        }
        task.updated_at = now;

        if !self.store.update_task(&task)? {
            return Err(AlmanacError::NotFound(format!("task {task_id}")));
        }
        let hook = self.hooks.on_task_updated_at(&task, Some(&old), now)?;
        tracing::info!(%task_id, removed = hook.removed, "task updated");
        Ok(TaskOutcome {
            task,
            removed: hook.removed,
            next_reminder: hook.scheduled,
        })
    }

    /// Delete a task and every reminder record derived from it.
    pub fn delete_task(&self, user_id: &str, task_id: &str) -> Result<DeleteSummary> {
        self.owned_task(user_id, task_id)?;
        let hook = self.hooks.on_task_deleted(task_id)?;
        let deleted = self.store.delete_task(task_id)?;
        tracing::info!(%task_id, "task deleted");
        Ok(DeleteSummary {
            tasks: usize::from(deleted),
            reminders: hook.removed,
        })
    }

    pub fn delete_all_tasks(&self, user_id: &str) -> Result<DeleteSummary> {
        require("user_id", user_id)?;
        let mut summary = DeleteSummary::default();
        for task in self.store.list_tasks(user_id)? {
            summary.reminders += self.hooks.on_task_deleted(&task.id)?.removed;
        }
        summary.tasks = self.store.delete_tasks_for_user(user_id)?;
        tracing::info!(%user_id, tasks = summary.tasks, "all tasks deleted");
        Ok(summary)
    }

    pub async fn complete_task(&self, user_id: &str, task_id: &str) -> Result<CompleteOutcome> {
        self.complete_task_at(user_id, task_id, Utc::now()).await
    }

    /// Mark a task complete, drop its open reminders and send a best-effort
    /// confirmation.
    pub async fn complete_task_at(
        &self,
        user_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CompleteOutcome> {
        let mut task = self.owned_task(user_id, task_id)?;
        task.status = TaskStatus::Complete;
        task.completed_at = Some(now);
        task.updated_at = now;
        self.store.update_task(&task)?;
        let hook = self.hooks.on_task_completed(task_id)?;

        let message = messages::task_completed(user_id, &task.id, &task.name);
        let notified = match self
            .deliver_and_record(user_id, &message, NotificationKind::TaskCompleted, Some(&task.id), now)
            .await
        {
            Ok(report) => report.any_delivered(),
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "completion notice not sent");
                false
            }
        };
        tracing::info!(%task_id, notified, "task completed");
        Ok(CompleteOutcome {
            task,
            removed: hook.removed,
            notified,
        })
    }

    pub fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        require("user_id", user_id)?;
        Ok(self.store.list_tasks(user_id)?)
    }

    pub async fn send_test_reminder(&self, user_id: &str, task_id: &str) -> Result<DeliveryReport> {
        self.send_test_reminder_at(user_id, task_id, Utc::now()).await
    }

    /// Send the task's reminder right away without touching its schedule.
    pub async fn send_test_reminder_at(
        &self,
        user_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let task = self.owned_task(user_id, task_id)?;
        let message = messages::task_reminder(user_id, &task.id, &task.name, task.time);
        self.deliver_and_record(user_id, &message, NotificationKind::TestReminder, Some(&task.id), now)
            .await
    }

    // -----------------------------------------------------------------------
    // Lifecycle hooks
    // -----------------------------------------------------------------------

    pub fn on_task_created_at(&self, task: &Task, now: DateTime<Utc>) -> Result<HookOutcome> {
        self.hooks.on_task_created_at(task, now)
    }

    pub fn on_task_updated_at(&self, task: &Task, old: Option<&Task>, now: DateTime<Utc>) -> Result<HookOutcome> {
        self.hooks.on_task_updated_at(task, old, now)
    }

    pub fn on_task_deleted(&self, task_id: &str) -> Result<HookOutcome> {
        self.hooks.on_task_deleted(task_id)
    }

    pub fn on_task_completed(&self, task_id: &str) -> Result<HookOutcome> {
        self.hooks.on_task_completed(task_id)
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    pub fn register_endpoint(&self, user_id: &str, device_id: &str, token: &str, platform: &str) -> Result<Endpoint> {
        self.register_endpoint_at(user_id, device_id, token, platform, Utc::now())
    }

    pub fn register_endpoint_at(
        &self,
        user_id: &str,
        device_id: &str,
        token: &str,
        platform: &str,
        now: DateTime<Utc>,
    ) -> Result<Endpoint> {
        self.registry()
            .register_endpoint_at(user_id, device_id, token, platform, now)
    }

    pub fn deactivate_endpoint(&self, user_id: &str, device_id: &str) -> Result<bool> {
        self.deactivate_endpoint_at(user_id, device_id, Utc::now())
    }

    /// Deactivate one device. When it was the user's last active device the
    /// user's session is closed as well.
    pub fn deactivate_endpoint_at(&self, user_id: &str, device_id: &str, now: DateTime<Utc>) -> Result<bool> {
        require("user_id", user_id)?;
        require("device_id", device_id)?;
        let changed = self.registry().deactivate_endpoint_at(user_id, device_id, now)?;
        if changed
            && !self
                .store
                .endpoints_for_user(user_id)?
                .iter()
                .any(|e| e.active)
        {
            self.store.record_logout(user_id, now)?;
        }
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Merge profile fields, creating an active user on first write.
    pub fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<UserProfile> {
        require("user_id", user_id)?;
        let location = update.location.as_deref().map(str::trim);
        let display_name = update.display_name.as_deref().map(str::trim);
        self.store
            .merge_user_profile(user_id, display_name, location, update.active)?;
        self.user(user_id)
    }

    pub fn record_login(&self, user_id: &str) -> Result<UserProfile> {
        self.record_login_at(user_id, Utc::now())
    }

    /// Open a session for `user_id`, creating the user on first login.
    pub fn record_login_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<UserProfile> {
        require("user_id", user_id)?;
        self.store.record_login(user_id, now)?;
        tracing::info!(%user_id, "user signed in");
        self.user(user_id)
    }

    pub fn record_logout(&self, user_id: &str) -> Result<UserProfile> {
        self.record_logout_at(user_id, Utc::now())
    }

    /// Close the session of a known user.
    pub fn record_logout_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<UserProfile> {
        require("user_id", user_id)?;
        if !self.store.record_logout(user_id, now)? {
            return Err(AlmanacError::NotFound(format!("user {user_id}")));
        }
        tracing::info!(%user_id, "user signed out");
        self.user(user_id)
    }

    fn user(&self, user_id: &str) -> Result<UserProfile> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| AlmanacError::NotFound(format!("user {user_id}")))
    }

    // -----------------------------------------------------------------------
    // Scans and broadcasts
    // -----------------------------------------------------------------------

    pub async fn scan_and_dispatch(&self, force: bool) -> Result<ScanSummary> {
        self.scan_and_dispatch_at(force, Utc::now()).await
    }

    pub async fn scan_and_dispatch_at(&self, force: bool, now: DateTime<Utc>) -> Result<ScanSummary> {
        self.scanner.scan_and_dispatch_at(force, now).await
    }

    pub async fn run_broadcast(&self, class: AlertClass, force: bool) -> Result<BroadcastSummary> {
        self.run_broadcast_at(class, force, Utc::now()).await
    }

    /// Run a broadcast of `class` through the configured alert source.
    pub async fn run_broadcast_at(
        &self,
        class: AlertClass,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<BroadcastSummary> {
        let source = self
            .alert_source
            .as_deref()
            .ok_or_else(|| AlmanacError::Config("no alert source configured".into()))?;
        self.broadcaster
            .run_broadcast_at(class, source, force, now)
            .await
    }

    /// Operating timezone all wall-clock task times refer to.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn owned_task(&self, user_id: &str, task_id: &str) -> Result<Task> {
        require("user_id", user_id)?;
        require("task_id", task_id)?;
        match self.store.get_task(task_id)? {
            Some(task) if task.user_id == user_id => Ok(task),
            _ => Err(AlmanacError::NotFound(format!("task {task_id}"))),
        }
    }

    async fn deliver_and_record(
        &self,
        user_id: &str,
        message: &PushMessage,
        kind: NotificationKind,
        task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let report = self.delivery.deliver_to_user_at(user_id, message, now).await?;
        if report.any_delivered() {
            self.store.insert_notification(&NotificationRecord::new(
                user_id,
                kind,
                message.title.clone(),
                message.body.clone(),
                task_id.map(str::to_owned),
                now,
            ))?;
        }
        Ok(report)
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AlmanacError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

fn required_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AlmanacError::InvalidInput("name is required".into()));
    }
    Ok(name.to_owned())
}

fn parse_time(raw: &str) -> Result<TimeOfDay> {
    TimeOfDay::parse(raw).map_err(|e| AlmanacError::InvalidInput(e.to_string()))
}

fn parse_recurrence(raw: &str) -> Result<Recurrence> {
    Recurrence::parse(raw).map_err(|e| AlmanacError::InvalidInput(e.to_string()))
}
