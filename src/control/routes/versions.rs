use crate::control::{ApiError, AppState};
use crate::records::versions;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use keepalive_core::api::CreateVersionRequest;
use keepalive_core::types::VersionDescriptor;

pub async fn list_versions(State(state): State<AppState>) -> Json<Vec<VersionDescriptor>> {
    Json(versions::list_versions(&state.store))
}

pub async fn create_version(
    State(state): State<AppState>,
    Json(req): Json<CreateVersionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let version = versions::add_version(&state.store, &req.family, req.protocol, &req.name)?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn delete_version(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if versions::remove_version(&state.store, &id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("version not found"))
    }
}
