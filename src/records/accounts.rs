use super::{not_found_as, RecordError};
use crate::store::{Document, DocumentStore, Filter, StoreError, Update};
use keepalive_core::types::{Account, AccountProfile};
use serde_json::json;
use time::OffsetDateTime;

pub fn get_account(store: &DocumentStore, id: i64) -> Option<Account> {
    store.find_one_as(&Filter::by_id(id))
}

/// Fetch the account for `id`, creating it on first contact and syncing any
/// display attributes that changed since.
pub fn ensure_account(
    store: &DocumentStore,
    id: i64,
    profile: &AccountProfile,
) -> Result<Account, RecordError> {
    if let Some(existing) = get_account(store, id) {
        let mut changes = Document::new();
        if profile.username.is_some() && profile.username != existing.username {
            changes.insert("username".into(), json!(profile.username));
        }
        if profile.display_name.is_some() && profile.display_name != existing.display_name {
            changes.insert("display_name".into(), json!(profile.display_name));
        }
        if changes.is_empty() {
            return Ok(existing);
        }
        return Ok(store.update_record(id, Update::SetFields(changes))?);
    }

    let account = Account {
        id,
        username: profile.username.clone(),
        display_name: profile.display_name.clone(),
        banned: false,
        privileged: false,
        created_at: OffsetDateTime::now_utc(),
    };
    match store.create_unique_record(&Filter::by_id(id), &account) {
        Ok(()) => {
            log::info!("New account {}", id);
            Ok(account)
        }
        // Lost a race with a concurrent first contact
        Err(StoreError::DuplicateKey(_)) => get_account(store, id).ok_or(RecordError::AccountNotFound),
        Err(e) => Err(e.into()),
    }
}

pub fn set_banned(store: &DocumentStore, id: i64, banned: bool) -> Result<Account, RecordError> {
    store
        .update_record(id, Update::set("banned", banned))
        .map_err(|e| not_found_as(e, RecordError::AccountNotFound))
}

pub fn set_privileged(store: &DocumentStore, id: i64, privileged: bool) -> Result<Account, RecordError> {
    store
        .update_record(id, Update::set("privileged", privileged))
        .map_err(|e| not_found_as(e, RecordError::AccountNotFound))
}
