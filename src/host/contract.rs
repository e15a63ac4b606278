//! Versioned request/response envelopes for the host bridge.
//!
//! The wire shape is `{v, request_id, command, payload}`. Each command's
//! payload is decoded into its own typed struct and validated before it
//! reaches the engine.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::alerts::AlertClass;

/// Contract version for request/response envelopes.
pub const CONTRACT_VERSION: u32 = 1;

/// Supported commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    CreateTask,
    UpdateTask,
    DeleteTask,
    DeleteAllTasks,
    CompleteTask,
    ListTasks,
    TestReminder,
    RegisterEndpoint,
    DeactivateEndpoint,
    UpdateProfile,
    UserLogin,
    UserLogout,
    Scan,
    Broadcast,
}

impl CommandName {
    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::UpdateTask => "update_task",
            Self::DeleteTask => "delete_task",
            Self::DeleteAllTasks => "delete_all_tasks",
            Self::CompleteTask => "complete_task",
            Self::ListTasks => "list_tasks",
            Self::TestReminder => "test_reminder",
            Self::RegisterEndpoint => "register_endpoint",
            Self::DeactivateEndpoint => "deactivate_endpoint",
            Self::UpdateProfile => "update_profile",
            Self::UserLogin => "user_login",
            Self::UserLogout => "user_logout",
            Self::Scan => "scan",
            Self::Broadcast => "broadcast",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "create_task" => Some(Self::CreateTask),
            "update_task" => Some(Self::UpdateTask),
            "delete_task" => Some(Self::DeleteTask),
            "delete_all_tasks" => Some(Self::DeleteAllTasks),
            "complete_task" => Some(Self::CompleteTask),
            "list_tasks" => Some(Self::ListTasks),
            "test_reminder" => Some(Self::TestReminder),
            "register_endpoint" => Some(Self::RegisterEndpoint),
            "deactivate_endpoint" => Some(Self::DeactivateEndpoint),
            "update_profile" => Some(Self::UpdateProfile),
            "user_login" => Some(Self::UserLogin),
            "user_logout" => Some(Self::UserLogout),
            "scan" => Some(Self::Scan),
            "broadcast" => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// A versioned request envelope from host -> engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RequestEnvelope {
    /// Build a v1 request envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != CONTRACT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, CONTRACT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// Validate the envelope and decode its payload.
    pub fn to_request(&self) -> Result<Request, ContractError> {
        self.validate()?;
        let p = &self.payload;
        let request = match self.command {
            CommandName::CreateTask => Request::CreateTask(decode(p)?),
            CommandName::UpdateTask => Request::UpdateTask(decode(p)?),
            CommandName::DeleteTask => Request::DeleteTask(decode(p)?),
            CommandName::DeleteAllTasks => Request::DeleteAllTasks(decode(p)?),
            CommandName::CompleteTask => Request::CompleteTask(decode(p)?),
            CommandName::ListTasks => Request::ListTasks(decode(p)?),
            CommandName::TestReminder => Request::TestReminder(decode(p)?),
            CommandName::RegisterEndpoint => Request::RegisterEndpoint(decode(p)?),
            CommandName::DeactivateEndpoint => Request::DeactivateEndpoint(decode(p)?),
            CommandName::UpdateProfile => Request::UpdateProfile(decode(p)?),
            CommandName::UserLogin => Request::UserLogin(decode(p)?),
            CommandName::UserLogout => Request::UserLogout(decode(p)?),
            CommandName::Scan => Request::Scan(decode_or_default(p)?),
            CommandName::Broadcast => Request::Broadcast(decode(p)?),
        };
        request.validate()?;
        Ok(request)
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateTask {
    pub user_id: String,
    pub name: String,
    pub time: String,
    #[serde(default = "default_recurrence")]
    pub recurrence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateTask {
    pub user_id: String,
    pub task_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub recurrence: Option<String>,
}

/// A task addressed on behalf of its owner.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskRef {
    pub user_id: String,
    pub task_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserRef {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterEndpoint {
    pub user_id: String,
    pub device_id: String,
    pub token: String,
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceRef {
    pub user_id: String,
    pub device_id: String,
}

/// Profile fields to merge; absent fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateProfile {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Scan {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Broadcast {
    pub class: AlertClass,
    #[serde(default)]
    pub force: bool,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateTask(CreateTask),
    UpdateTask(UpdateTask),
    DeleteTask(TaskRef),
    DeleteAllTasks(UserRef),
    CompleteTask(TaskRef),
    ListTasks(UserRef),
    TestReminder(TaskRef),
    RegisterEndpoint(RegisterEndpoint),
    DeactivateEndpoint(DeviceRef),
    UpdateProfile(UpdateProfile),
    UserLogin(UserRef),
    UserLogout(UserRef),
    Scan(Scan),
    Broadcast(Broadcast),
}

impl Request {
    /// Whether handling this request should be preceded by a throttled
    /// due-scan.
    #[must_use]
    pub fn wants_opportunistic_scan(&self) -> bool {
        !matches!(self, Self::Scan(_))
    }

    fn validate(&self) -> Result<(), ContractError> {
        match self {
            Self::CreateTask(r) => {
                required("user_id", &r.user_id)?;
                required("name", &r.name)?;
                required("time", &r.time)
            }
            Self::UpdateTask(r) => {
                required("user_id", &r.user_id)?;
                required("task_id", &r.task_id)?;
                if r.name.is_none() && r.time.is_none() && r.recurrence.is_none() {
                    return Err(invalid_payload("update_task needs at least one field to change"));
                }
                Ok(())
            }
            Self::DeleteTask(r) | Self::CompleteTask(r) | Self::TestReminder(r) => {
                required("user_id", &r.user_id)?;
                required("task_id", &r.task_id)
            }
            Self::DeleteAllTasks(r)
            | Self::ListTasks(r)
            | Self::UserLogin(r)
            | Self::UserLogout(r) => required("user_id", &r.user_id),
            Self::UpdateProfile(r) => {
                required("user_id", &r.user_id)?;
                if r.display_name.is_none() && r.location.is_none() && r.active.is_none() {
                    return Err(invalid_payload("update_profile needs at least one field to change"));
                }
                Ok(())
            }
            Self::RegisterEndpoint(r) => {
                required("user_id", &r.user_id)?;
                required("device_id", &r.device_id)?;
                required("token", &r.token)
            }
            Self::DeactivateEndpoint(r) => {
                required("user_id", &r.user_id)?;
                required("device_id", &r.device_id)
            }
            Self::Scan(_) | Self::Broadcast(_) => Ok(()),
        }
    }
}

fn default_recurrence() -> String {
    "Once".to_owned()
}

fn decode<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, ContractError> {
    serde_json::from_value(payload.clone()).map_err(|e| invalid_payload(e.to_string()))
}

fn decode_or_default<T: DeserializeOwned + Default>(
    payload: &serde_json::Value,
) -> Result<T, ContractError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    decode(payload)
}

fn required(field: &str, value: &str) -> Result<(), ContractError> {
    if value.trim().is_empty() {
        return Err(invalid_payload(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn invalid_payload(message: impl Into<String>) -> ContractError {
    ContractError::new(ContractErrorKind::InvalidPayload, message.into())
}

// ---------------------------------------------------------------------------
// Responses and errors
// ---------------------------------------------------------------------------

/// A versioned response envelope from engine -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
    InvalidPayload,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}
