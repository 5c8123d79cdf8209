//! Local HTTP/JSON control API the chat front end drives.

pub mod routes;
pub mod server;

pub use server::ControlServer;

use crate::records::accounts;
use crate::records::targets::TargetLimits;
use crate::records::RecordError;
use crate::store::DocumentStore;
use crate::supervisor::Supervisor;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use keepalive_core::api::{ApiEvent, ErrorResponse};
use keepalive_core::cache::TtlCache;
use keepalive_core::types::Account;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Buffered events per WebSocket subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// Shared state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub supervisor: Arc<Supervisor>,
    pub events: broadcast::Sender<ApiEvent>,
    pub accounts: Arc<TtlCache<i64, Account>>,
    pub limits: TargetLimits,
    pub start_time: Instant,
}

impl AppState {
    /// Build the state and forward supervisor events to WebSocket subscribers.
    pub fn new(
        store: Arc<DocumentStore>,
        supervisor: Arc<Supervisor>,
        limits: TargetLimits,
        account_ttl: Duration,
        account_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let tx = events.clone();
        supervisor.on_state_change(move |change| {
            // No subscribers is fine
            let _ = tx.send(ApiEvent::StateChanged(change.clone()));
        });
        let tx = events.clone();
        supervisor.on_failure_notification(move |notice| {
            let _ = tx.send(ApiEvent::Failure(notice.clone()));
        });

        Self {
            store,
            supervisor,
            events,
            accounts: Arc::new(TtlCache::new(account_ttl, account_capacity)),
            limits,
            start_time: Instant::now(),
        }
    }

    /// Account lookup through the TTL cache.
    pub fn account(&self, id: i64) -> Option<Account> {
        if let Some(account) = self.accounts.get(&id) {
            return Some(account);
        }
        let account = accounts::get_account(&self.store, id)?;
        self.accounts.set(id, account.clone());
        Some(account)
    }
}

/// Build the complete axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::get_health))
        .route(
            "/v1/targets",
            get(routes::targets::list_targets).post(routes::targets::create_target),
        )
        .route(
            "/v1/targets/{id}",
            patch(routes::targets::update_target).delete(routes::targets::delete_target),
        )
        .route("/v1/targets/{id}/start", post(routes::targets::start_target))
        .route("/v1/targets/{id}/stop", post(routes::targets::stop_target))
        .route(
            "/v1/versions",
            get(routes::versions::list_versions).post(routes::versions::create_version),
        )
        .route(
            "/v1/versions/{id}",
            axum::routing::delete(routes::versions::delete_version),
        )
        .route("/v1/accounts", post(routes::accounts::ensure_account))
        .route("/v1/accounts/{id}", patch(routes::accounts::update_account))
        .route(
            "/v1/settings",
            get(routes::settings::get_settings).patch(routes::settings::update_settings),
        )
        .route("/v1/events", get(routes::events::ws_handler))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}

/// Error body plus status code for a failed request.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        let status = match &err {
            RecordError::TargetNotFound | RecordError::AccountNotFound => StatusCode::NOT_FOUND,
            RecordError::InvalidHost(_)
            | RecordError::InvalidPort
            | RecordError::InvalidLabel
            | RecordError::ReservedKey(_) => StatusCode::BAD_REQUEST,
            RecordError::DuplicateAddress { .. } | RecordError::DuplicateVersion { .. } => StatusCode::CONFLICT,
            RecordError::LimitReached { .. } => StatusCode::FORBIDDEN,
            RecordError::Store(e) => {
                log::error!("Store error while serving request: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}
