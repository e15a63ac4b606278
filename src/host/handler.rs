//! Request handler: decodes envelopes, runs them against the engine and
//! converts every outcome into a response envelope.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::engine::{Engine, ProfileUpdate, TaskUpdate};
use crate::error::{AlmanacError, Result};
use crate::host::contract::{Request, RequestEnvelope, ResponseEnvelope};

/// Handles host requests against one [`Engine`].
#[derive(Clone)]
pub struct RequestHandler {
    engine: Arc<Engine>,
}

impl RequestHandler {
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn handle(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        self.handle_at(envelope, Utc::now()).await
    }

    /// Handle one request. Never fails: contract, validation and engine
    /// errors all become error envelopes.
    pub async fn handle_at(&self, envelope: RequestEnvelope, now: DateTime<Utc>) -> ResponseEnvelope {
        let request_id = envelope.request_id.clone();
        let request = match envelope.to_request() {
            Ok(request) => request,
            Err(e) => {
                debug!(%request_id, error = %e, "rejected request");
                return ResponseEnvelope::error(request_id, e.to_string());
            }
        };

        if request.wants_opportunistic_scan() {
            match self.engine.scan_and_dispatch_at(false, now).await {
                Ok(summary) if summary.scanned => {
                    debug!(%request_id, sent = summary.sent, "opportunistic scan ran");
                }
                Ok(_) => {}
                Err(e) => warn!(%request_id, error = %e, "opportunistic scan failed"),
            }
        }

        match self.execute(request, now).await {
            Ok(payload) => ResponseEnvelope::ok(request_id, payload),
            Err(e) => {
                warn!(%request_id, command = envelope.command.as_str(), error = %e, "request failed");
                ResponseEnvelope::error(request_id, e.to_string())
            }
        }
    }

    async fn execute(&self, request: Request, now: DateTime<Utc>) -> Result<serde_json::Value> {
        let engine = &self.engine;
        match request {
            Request::CreateTask(r) => {
                to_value(&engine.create_task_at(&r.user_id, &r.name, &r.time, &r.recurrence, now)?)
            }
            Request::UpdateTask(r) => {
                let update = TaskUpdate {
                    name: r.name,
                    time: r.time,
                    recurrence: r.recurrence,
                };
                to_value(&engine.update_task_at(&r.user_id, &r.task_id, update, now)?)
            }
            Request::DeleteTask(r) => to_value(&engine.delete_task(&r.user_id, &r.task_id)?),
            Request::DeleteAllTasks(r) => to_value(&engine.delete_all_tasks(&r.user_id)?),
            Request::CompleteTask(r) => {
                to_value(&engine.complete_task_at(&r.user_id, &r.task_id, now).await?)
            }
            Request::ListTasks(r) => {
                let tasks = engine.list_tasks(&r.user_id)?;
                Ok(json!({ "count": tasks.len(), "tasks": tasks }))
            }
            Request::TestReminder(r) => {
                let report = engine.send_test_reminder_at(&r.user_id, &r.task_id, now).await?;
                Ok(json!({ "sent": report.any_delivered(), "report": report }))
            }
            Request::RegisterEndpoint(r) => to_value(&engine.register_endpoint_at(
                &r.user_id,
                &r.device_id,
                &r.token,
                &r.platform,
                now,
            )?),
            Request::DeactivateEndpoint(r) => {
                let deactivated = engine.deactivate_endpoint_at(&r.user_id, &r.device_id, now)?;
                Ok(json!({ "deactivated": deactivated }))
            }
            Request::UpdateProfile(r) => {
                let update = ProfileUpdate {
                    display_name: r.display_name,
                    location: r.location,
                    active: r.active,
                };
                to_value(&engine.update_profile(&r.user_id, update)?)
            }
            Request::UserLogin(r) => to_value(&engine.record_login_at(&r.user_id, now)?),
            Request::UserLogout(r) => to_value(&engine.record_logout_at(&r.user_id, now)?),
            Request::Scan(r) => to_value(&engine.scan_and_dispatch_at(r.force, now).await?),
            Request::Broadcast(r) => {
                to_value(&engine.run_broadcast_at(r.class, r.force, now).await?)
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| AlmanacError::Scheduler(format!("failed to serialize response: {e}")))
}
