use crate::control::AppState;
use axum::Json;
use axum::extract::State;
use keepalive_core::api::HealthResponse;

pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
        store_flushes: state.store.flush_count(),
        pending_writes: state.store.has_pending_writes(),
    })
}
