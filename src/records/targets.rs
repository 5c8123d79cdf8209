use super::{accounts, not_found_as, RecordError};
use crate::store::{Document, DocumentStore, Filter, StoreError, Update};
use crate::supervisor::Supervisor;
use keepalive_core::naming;
use keepalive_core::types::{ManagedTarget, TargetKind, TARGETS};
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;

/// Upper bound on a worker label.
pub const MAX_LABEL_LEN: usize = 32;

#[derive(Clone, Copy, Debug)]
pub struct TargetLimits {
    /// Targets an unprivileged owner may register.
    pub max_per_owner: usize,
}

impl Default for TargetLimits {
    fn default() -> Self {
        Self { max_per_owner: 3 }
    }
}

static HOST_REGEX: OnceLock<Regex> = OnceLock::new();

/// DNS name or dotted IPv4 address.
fn is_valid_host(host: &str) -> bool {
    let regex = HOST_REGEX.get_or_init(|| {
        Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$")
            .expect("Invalid host regex")
    });
    host.len() <= 253 && regex.is_match(host)
}

pub fn get_target(store: &DocumentStore, id: &str) -> Option<ManagedTarget> {
    store.find_one_as(&Filter::by_id(id))
}

/// The owner's targets in creation order.
pub fn targets_for_owner(store: &DocumentStore, owner_id: i64) -> Vec<ManagedTarget> {
    let mut targets: Vec<ManagedTarget> = store.find_as(&Filter::new().eq("owner_id", owner_id));
    targets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    targets
}

/// Register a new target and give it the next `S-n` name.
pub fn create_target(
    store: &DocumentStore,
    owner_id: i64,
    kind: TargetKind,
    host: &str,
    port: u16,
    limits: TargetLimits,
) -> Result<ManagedTarget, RecordError> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if !is_valid_host(&host) {
        return Err(RecordError::InvalidHost(host));
    }
    if port == 0 {
        return Err(RecordError::InvalidPort);
    }

    let privileged = accounts::get_account(store, owner_id).is_some_and(|a| a.privileged);
    let owned = store.count(TARGETS, &Filter::new().eq("owner_id", owner_id));
    if !privileged && owned >= limits.max_per_owner {
        return Err(RecordError::LimitReached { limit: limits.max_per_owner });
    }

    let mut target = ManagedTarget::new(owner_id, kind, host, port);
    target.name = naming::sequence_name(owned);
    let unique = Filter::new().eq("host", target.host.as_str()).eq("port", port);
    match store.create_unique_record(&unique, &target) {
        Ok(()) => {}
        Err(StoreError::DuplicateKey(_)) => {
            return Err(RecordError::DuplicateAddress { host: target.host, port });
        }
        Err(e) => return Err(e.into()),
    }

    log::info!("Owner {} registered {} as {}", owner_id, target.address(), target.name);
    compact_owner_names(store, owner_id);
    Ok(get_target(store, &target.id).unwrap_or(target))
}

/// Renumber the owner's targets `S-1..S-n` in creation order.
pub fn compact_owner_names(store: &DocumentStore, owner_id: i64) {
    let mut targets = targets_for_owner(store, owner_id);
    for (id, name) in naming::compact_names(&mut targets) {
        if let Err(e) = store.update_one(TARGETS, id.as_str(), Update::set("name", name)) {
            log::warn!("Failed to rename target {}: {}", id, e);
        }
    }
}

/// Stop the target's worker, then remove it and recompact its owner's names.
pub fn delete_target(
    store: &DocumentStore,
    supervisor: &Supervisor,
    id: &str,
) -> Result<ManagedTarget, RecordError> {
    let target = get_target(store, id).ok_or(RecordError::TargetNotFound)?;
    supervisor.stop(id);
    if !store.delete_one(TARGETS, &Filter::by_id(id)) {
        return Err(RecordError::TargetNotFound);
    }
    log::info!("Deleted target {} ({})", target.name, target.address());
    compact_owner_names(store, target.owner_id);
    Ok(target)
}

fn set_field(store: &DocumentStore, id: &str, field: &str, value: serde_json::Value) -> Result<ManagedTarget, RecordError> {
    let mut fields = Document::new();
    fields.insert(field.to_string(), value);
    store
        .update_record(id, Update::SetFields(fields))
        .map_err(|e| not_found_as(e, RecordError::TargetNotFound))
}

pub fn set_worker_label(store: &DocumentStore, id: &str, label: &str) -> Result<ManagedTarget, RecordError> {
    let label = label.trim();
    if label.is_empty() || label.chars().count() > MAX_LABEL_LEN {
        return Err(RecordError::InvalidLabel);
    }
    set_field(store, id, "worker_label", json!(label))
}

pub fn set_notify_on_failure(store: &DocumentStore, id: &str, enabled: bool) -> Result<ManagedTarget, RecordError> {
    set_field(store, id, "notify_on_failure", json!(enabled))
}

pub fn set_auto_restart(store: &DocumentStore, id: &str, enabled: bool) -> Result<ManagedTarget, RecordError> {
    set_field(store, id, "auto_restart", json!(enabled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use crate::supervisor::{OsSpawner, StatusPingProbe, SupervisorConfig};
    use keepalive_core::types::{AccountProfile, ALL_COLLECTIONS};
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, Arc<DocumentStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path(), ALL_COLLECTIONS, StoreOptions::default()).unwrap();
        (dir, store)
    }

    fn supervisor(store: &Arc<DocumentStore>) -> Arc<Supervisor> {
        Supervisor::new(
            store.clone(),
            Arc::new(OsSpawner::new("/nonexistent/keepalive-worker")),
            Arc::new(StatusPingProbe),
            SupervisorConfig::default(),
        )
    }

    fn names(store: &DocumentStore, owner: i64) -> Vec<String> {
        targets_for_owner(store, owner).into_iter().map(|t| t.name).collect()
    }

    #[test]
    fn host_validation() {
        assert!(is_valid_host("play.example.net"));
        assert!(is_valid_host("10.0.0.1"));
        assert!(is_valid_host("localhost"));
        assert!(!is_valid_host(""));
        assert!(!is_valid_host("-bad.example"));
        assert!(!is_valid_host("has space.example"));
        assert!(!is_valid_host("a..b"));
    }

    #[test]
    fn create_normalises_and_names_sequentially() {
        let (_dir, store) = store();
        let limits = TargetLimits::default();
        let first = create_target(&store, 1, TargetKind::Java, " Play.Example.NET. ", 25565, limits).unwrap();
        let second = create_target(&store, 1, TargetKind::Java, "b.example.net", 25565, limits).unwrap();

        assert_eq!(first.host, "play.example.net");
        assert_eq!(first.worker_label, "play.example.net");
        assert_eq!(first.name, "S-1");
        assert_eq!(second.name, "S-2");
        assert!(matches!(
            create_target(&store, 1, TargetKind::Java, "bad host", 25565, limits),
            Err(RecordError::InvalidHost(_))
        ));
        assert!(matches!(
            create_target(&store, 1, TargetKind::Java, "c.example.net", 0, limits),
            Err(RecordError::InvalidPort)
        ));
    }

    #[test]
    fn duplicate_address_is_rejected_across_owners() {
        let (_dir, store) = store();
        let limits = TargetLimits::default();
        create_target(&store, 1, TargetKind::Java, "play.example.net", 25565, limits).unwrap();

        let err = create_target(&store, 2, TargetKind::Java, "PLAY.example.net", 25565, limits).unwrap_err();
        assert!(matches!(err, RecordError::DuplicateAddress { port: 25565, .. }));
        assert!(create_target(&store, 2, TargetKind::Java, "play.example.net", 25566, limits).is_ok());
        assert!(names(&store, 2) == vec!["S-1".to_string()]);
    }

    #[test]
    fn per_owner_cap_unless_privileged() {
        let (_dir, store) = store();
        let limits = TargetLimits { max_per_owner: 1 };
        create_target(&store, 1, TargetKind::Java, "a.example.net", 25565, limits).unwrap();
        assert!(matches!(
            create_target(&store, 1, TargetKind::Java, "b.example.net", 25565, limits),
            Err(RecordError::LimitReached { limit: 1 })
        ));

        accounts::ensure_account(&store, 1, &AccountProfile::default()).unwrap();
        accounts::set_privileged(&store, 1, true).unwrap();
        assert!(create_target(&store, 1, TargetKind::Java, "b.example.net", 25565, limits).is_ok());
    }

    #[tokio::test]
    async fn deleting_middle_target_recompacts_names() {
        let (_dir, store) = store();
        let supervisor = supervisor(&store);
        let limits = TargetLimits::default();
        let _a = create_target(&store, 1, TargetKind::Java, "a.example.net", 25565, limits).unwrap();
        let b = create_target(&store, 1, TargetKind::Java, "b.example.net", 25565, limits).unwrap();
        let c = create_target(&store, 1, TargetKind::Java, "c.example.net", 25565, limits).unwrap();
        let other = create_target(&store, 2, TargetKind::Java, "d.example.net", 25565, limits).unwrap();

        delete_target(&store, &supervisor, &b.id).unwrap();

        assert_eq!(names(&store, 1), vec!["S-1", "S-2"]);
        assert_eq!(get_target(&store, &c.id).unwrap().name, "S-2");
        assert_eq!(get_target(&store, &other.id).unwrap().name, "S-1");
        assert!(matches!(
            delete_target(&store, &supervisor, &b.id),
            Err(RecordError::TargetNotFound)
        ));
    }

    #[tokio::test]
    async fn delete_of_an_idle_target_removes_the_record() {
        let (_dir, store) = store();
        let supervisor = supervisor(&store);
        let target = create_target(&store, 1, TargetKind::Java, "a.example.net", 25565, TargetLimits::default()).unwrap();
        set_auto_restart(&store, &target.id, true).unwrap();

        let deleted = delete_target(&store, &supervisor, &target.id).unwrap();
        assert_eq!(deleted.id, target.id);
        assert!(deleted.auto_restart);
        assert!(get_target(&store, &target.id).is_none());
    }

    #[test]
    fn toggles_and_label() {
        let (_dir, store) = store();
        let target = create_target(&store, 1, TargetKind::Java, "a.example.net", 25565, TargetLimits::default()).unwrap();

        assert!(set_notify_on_failure(&store, &target.id, true).unwrap().notify_on_failure);
        assert!(set_auto_restart(&store, &target.id, true).unwrap().auto_restart);
        assert_eq!(set_worker_label(&store, &target.id, " afk-bot ").unwrap().worker_label, "afk-bot");
        assert!(matches!(set_worker_label(&store, &target.id, "  "), Err(RecordError::InvalidLabel)));
        assert!(matches!(
            set_auto_restart(&store, "missing", true),
            Err(RecordError::TargetNotFound)
        ));
    }
}
