use crate::control::{ApiError, AppState};
use crate::records::global;
use axum::Json;
use axum::extract::State;
use keepalive_core::api::UpdateSettingsRequest;
use keepalive_core::types::GlobalSettings;

pub async fn get_settings(State(state): State<AppState>) -> Json<GlobalSettings> {
    Json(global::global_settings(&state.store))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<GlobalSettings>, ApiError> {
    if let Some(enabled) = req.service_enabled {
        global::set_service_enabled(&state.store, enabled)?;
    }
    for requirement in &req.add_requirements {
        global::add_requirement(&state.store, requirement)?;
    }
    for requirement in &req.remove_requirements {
        global::remove_requirement(&state.store, requirement)?;
    }
    for (key, value) in req.values {
        global::set_global_value(&state.store, &key, value)?;
    }
    Ok(Json(global::global_settings(&state.store)))
}
