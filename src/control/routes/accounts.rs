use crate::control::{ApiError, AppState};
use crate::records::accounts;
use axum::Json;
use axum::extract::{Path, State};
use keepalive_core::api::{EnsureAccountRequest, UpdateAccountRequest};
use keepalive_core::types::{Account, AccountProfile};

pub async fn ensure_account(
    State(state): State<AppState>,
    Json(req): Json<EnsureAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let profile = AccountProfile {
        username: req.username,
        display_name: req.display_name,
    };
    let account = accounts::ensure_account(&state.store, req.id, &profile)?;
    state.accounts.set(account.id, account.clone());
    Ok(Json(account))
}

pub async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    let mut account = accounts::get_account(&state.store, id).ok_or_else(|| ApiError::not_found("account not found"))?;
    if let Some(banned) = req.banned {
        account = accounts::set_banned(&state.store, id, banned)?;
        log::info!("Account {} {}", id, if banned { "banned" } else { "unbanned" });
    }
    if let Some(privileged) = req.privileged {
        account = accounts::set_privileged(&state.store, id, privileged)?;
    }
    state.accounts.invalidate(&id);
    Ok(Json(account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::test_support;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn ban_is_visible_through_the_cache() {
        let (_dir, state) = test_support::state();
        let req = EnsureAccountRequest { id: 9, username: Some("steve".into()), display_name: None };
        ensure_account(State(state.clone()), Json(req)).await.unwrap();
        assert!(!state.account(9).unwrap().banned);

        let Json(account) = update_account(
            State(state.clone()),
            Path(9),
            Json(UpdateAccountRequest { banned: Some(true), privileged: None }),
        )
        .await
        .unwrap();
        assert!(account.banned);
        assert!(state.account(9).unwrap().banned);

        let err = update_account(State(state), Path(10), Json(UpdateAccountRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
