use super::RecordError;
use crate::store::{DocumentStore, Filter, StoreError, Update, ID_FIELD};
use keepalive_core::types::{GlobalSettings, GLOBAL_SETTINGS_ID};
use serde_json::Value;

/// The settings singleton, or defaults if it has never been written.
pub fn global_settings(store: &DocumentStore) -> GlobalSettings {
    store
        .find_one_as(&Filter::by_id(GLOBAL_SETTINGS_ID))
        .unwrap_or_default()
}

fn ensure_singleton(store: &DocumentStore) -> Result<(), RecordError> {
    match store.create_unique_record(&Filter::by_id(GLOBAL_SETTINGS_ID), &GlobalSettings::default()) {
        Ok(()) | Err(StoreError::DuplicateKey(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn update(store: &DocumentStore, update: Update) -> Result<GlobalSettings, RecordError> {
    ensure_singleton(store)?;
    Ok(store.update_record(GLOBAL_SETTINGS_ID, update)?)
}

pub fn set_service_enabled(store: &DocumentStore, enabled: bool) -> Result<GlobalSettings, RecordError> {
    log::info!("Service {}", if enabled { "enabled" } else { "disabled" });
    update(store, Update::set("service_enabled", enabled))
}

pub fn add_requirement(store: &DocumentStore, requirement: &str) -> Result<GlobalSettings, RecordError> {
    update(store, Update::add_to_set("requirements", requirement))
}

pub fn remove_requirement(store: &DocumentStore, requirement: &str) -> Result<GlobalSettings, RecordError> {
    update(store, Update::pull("requirements", requirement))
}

/// Set a free-form key on the settings bag.
pub fn set_global_value(
    store: &DocumentStore,
    key: &str,
    value: Value,
) -> Result<GlobalSettings, RecordError> {
    if key == ID_FIELD {
        return Err(RecordError::ReservedKey(key.to_string()));
    }
    update(store, Update::set(key, value))
}
