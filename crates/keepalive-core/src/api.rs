use crate::events::{FailureNotice, StateChange};
use crate::types::TargetKind;
use serde::{Deserialize, Serialize};

// ── Control API request/response types ──────────────────────────────────────

/// GET /health response
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Completed store flush cycles since boot.
    pub store_flushes: u64,
    pub pending_writes: bool,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET /v1/targets query
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TargetsQuery {
    #[serde(default)]
    pub owner: Option<i64>,
}

/// POST /v1/targets request body
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTargetRequest {
    pub owner_id: i64,
    #[serde(default)]
    pub kind: TargetKind,
    pub host: String,
    pub port: u16,
}

/// PATCH /v1/targets/{id} request body
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateTargetRequest {
    /// User on whose behalf the target is changed.
    pub requested_by: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_restart: Option<bool>,
}

/// POST /v1/targets/{id}/start and /stop request body
#[derive(Debug, Serialize, Deserialize)]
pub struct TargetActionRequest {
    /// User on whose behalf the worker is started or stopped.
    pub requested_by: i64,
}

/// DELETE /v1/targets/{id} query
#[derive(Debug, Serialize, Deserialize)]
pub struct RequesterQuery {
    pub requested_by: i64,
}

/// POST /v1/versions request body
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateVersionRequest {
    pub family: String,
    pub protocol: i32,
    pub name: String,
}

/// POST /v1/accounts request body
#[derive(Debug, Serialize, Deserialize)]
pub struct EnsureAccountRequest {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// PATCH /v1/accounts/{id} request body
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
}

/// PATCH /v1/settings request body
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_requirements: Vec<String>,
    /// Free-form keys to set on the settings bag.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub values: serde_json::Map<String, serde_json::Value>,
}

/// Messages pushed over the GET /v1/events WebSocket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiEvent {
    StateChanged(StateChange),
    Failure(FailureNotice),
}
