use crate::control::{ApiError, AppState};
use crate::records::{global, targets};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use keepalive_core::api::{
    CreateTargetRequest, RequesterQuery, TargetActionRequest, TargetsQuery, UpdateTargetRequest,
};
use keepalive_core::events::StartOutcome;
use keepalive_core::types::{Account, ManagedTarget};

pub async fn list_targets(
    State(state): State<AppState>,
    Query(query): Query<TargetsQuery>,
) -> Json<Vec<ManagedTarget>> {
    let targets = match query.owner {
        Some(owner) => targets::targets_for_owner(&state.store, owner),
        None => state.store.read_as(),
    };
    Json(targets)
}

pub async fn create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.account(req.owner_id).is_some_and(|a| a.banned) {
        return Err(ApiError::forbidden("account is banned"));
    }
    let target = targets::create_target(&state.store, req.owner_id, req.kind, &req.host, req.port, state.limits)?;
    Ok((StatusCode::CREATED, Json(target)))
}

/// Load the target and check that `requested_by` owns it or is privileged.
fn owned_target(state: &AppState, id: &str, requested_by: i64) -> Result<(ManagedTarget, Option<Account>), ApiError> {
    let target = targets::get_target(&state.store, id).ok_or_else(|| ApiError::not_found("target not found"))?;
    let requester = state.account(requested_by);
    let privileged = requester.as_ref().is_some_and(|a| a.privileged);
    if target.owner_id != requested_by && !privileged {
        return Err(ApiError::forbidden("target belongs to another account"));
    }
    Ok((target, requester))
}

pub async fn update_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTargetRequest>,
) -> Result<Json<ManagedTarget>, ApiError> {
    let (mut target, _) = owned_target(&state, &id, req.requested_by)?;
    if let Some(label) = &req.worker_label {
        target = targets::set_worker_label(&state.store, &id, label)?;
    }
    if let Some(enabled) = req.notify_on_failure {
        target = targets::set_notify_on_failure(&state.store, &id, enabled)?;
    }
    if let Some(enabled) = req.auto_restart {
        target = targets::set_auto_restart(&state.store, &id, enabled)?;
    }
    Ok(Json(target))
}

pub async fn delete_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RequesterQuery>,
) -> Result<Json<ManagedTarget>, ApiError> {
    owned_target(&state, &id, query.requested_by)?;
    Ok(Json(targets::delete_target(&state.store, &state.supervisor, &id)?))
}

fn outcome_status(outcome: &StartOutcome) -> StatusCode {
    match outcome {
        StartOutcome::Started { .. } => StatusCode::OK,
        StartOutcome::AlreadyRunning | StartOutcome::Cancelled => StatusCode::CONFLICT,
        StartOutcome::NotFound => StatusCode::NOT_FOUND,
        StartOutcome::UnsupportedKind | StartOutcome::UnsupportedVersion { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        StartOutcome::Unreachable => StatusCode::BAD_GATEWAY,
        StartOutcome::SpawnFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn start_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TargetActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, requester) = owned_target(&state, &id, req.requested_by)?;
    let privileged = requester.as_ref().is_some_and(|a| a.privileged);

    if requester.as_ref().is_some_and(|a| a.banned) {
        return Err(ApiError::forbidden("account is banned"));
    }
    if !privileged && !global::global_settings(&state.store).service_enabled {
        return Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "service is disabled"));
    }

    let outcome = state.supervisor.start(&id, None).await;
    Ok((outcome_status(&outcome), Json(outcome)))
}

pub async fn stop_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TargetActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    owned_target(&state, &id, req.requested_by)?;
    let signaled = state.supervisor.stop(&id);
    Ok(Json(serde_json::json!({ "signaled": signaled })))
}
