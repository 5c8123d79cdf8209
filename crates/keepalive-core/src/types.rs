use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

/// Collection name for [`ManagedTarget`] records.
pub const TARGETS: &str = "targets";
/// Collection name for [`Account`] records.
pub const ACCOUNTS: &str = "accounts";
/// Collection name for [`VersionDescriptor`] records.
pub const VERSIONS: &str = "versions";
/// Collection name for the [`GlobalSettings`] singleton.
pub const SETTINGS: &str = "settings";

/// Every collection the daemon persists, in load order.
pub const ALL_COLLECTIONS: &[&str] = &[TARGETS, ACCOUNTS, VERSIONS, SETTINGS];

/// A record type stored in one named collection.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;
}

/// Generate a fresh opaque identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The flavour of remote server a target points at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Java,
    Bedrock,
}

impl TargetKind {
    /// Whether workers can still be launched for this kind.
    pub fn is_supported(self) -> bool {
        matches!(self, TargetKind::Java)
    }

    /// Protocol family used to look up [`VersionDescriptor`]s.
    pub fn protocol_family(self) -> &'static str {
        match self {
            TargetKind::Java => "java",
            TargetKind::Bedrock => "bedrock",
        }
    }
}

/// Why a target ended up in the error state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The discovered protocol version is not in the version table.
    UnsupportedVersion,
    /// The discovery probe failed or timed out.
    Unreachable,
    /// The worker process could not be spawned.
    SpawnFailed,
}

/// Lifecycle state of a managed target's worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Idle,
    Resolving,
    Launching,
    Running,
    Stopping,
    Error { reason: ErrorReason },
}

impl TargetStatus {
    /// `idle` and `error` are the only states that accept a fresh start.
    pub fn accepts_start(self) -> bool {
        matches!(self, TargetStatus::Idle | TargetStatus::Error { .. })
    }

    /// States in which a worker process exists or is being brought up.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TargetStatus::Resolving
                | TargetStatus::Launching
                | TargetStatus::Running
                | TargetStatus::Stopping
        )
    }
}

/// One remote server a user wants kept alive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManagedTarget {
    pub id: String,
    pub owner_id: i64,
    #[serde(default)]
    pub kind: TargetKind,
    pub host: String,
    pub port: u16,
    /// Auto-assigned `S-n` name, recompacted per owner.
    pub name: String,
    #[serde(default)]
    pub worker_label: String,
    #[serde(default)]
    pub status: TargetStatus,
    /// Set only while a worker process is believed to exist.
    #[serde(default)]
    pub worker_pid: Option<u32>,
    /// Release name resolved by the last successful discovery probe.
    #[serde(default)]
    pub resolved_version: Option<String>,
    #[serde(default)]
    pub notify_on_failure: bool,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ManagedTarget {
    pub fn new(owner_id: i64, kind: TargetKind, host: String, port: u16) -> Self {
        Self {
            id: new_id(),
            owner_id,
            kind,
            worker_label: host.clone(),
            host,
            port,
            name: String::new(),
            status: TargetStatus::Idle,
            worker_pid: None,
            resolved_version: None,
            notify_on_failure: false,
            auto_restart: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// `host:port` as shown to users and passed to the probe.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Record for ManagedTarget {
    const COLLECTION: &'static str = TARGETS;
}

/// One end user that has interacted with the system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Platform user id.
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub privileged: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record for Account {
    const COLLECTION: &'static str = ACCOUNTS;
}

/// Mutable display attributes synced onto an [`Account`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Maps a protocol number to a release name within one protocol family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    pub id: String,
    pub family: String,
    pub protocol: i32,
    pub name: String,
}

impl Record for VersionDescriptor {
    const COLLECTION: &'static str = VERSIONS;
}

/// Identity of the [`GlobalSettings`] singleton document.
pub const GLOBAL_SETTINGS_ID: &str = "global";

/// Small mutable key/value bag shared by the whole service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub id: String,
    #[serde(default = "default_service_enabled")]
    pub service_enabled: bool,
    /// Gating requirements a user must satisfy before using the service.
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_service_enabled() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            id: GLOBAL_SETTINGS_ID.to_string(),
            service_enabled: default_service_enabled(),
            requirements: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Record for GlobalSettings {
    const COLLECTION: &'static str = SETTINGS;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_as_tagged_object() {
        let json = serde_json::to_value(TargetStatus::Running).unwrap();
        assert_eq!(json, serde_json::json!({"state": "running"}));

        let json = serde_json::to_value(TargetStatus::Error {
            reason: ErrorReason::UnsupportedVersion,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "error", "reason": "unsupported_version"})
        );
    }

    #[test]
    fn only_idle_and_error_accept_start() {
        assert!(TargetStatus::Idle.accepts_start());
        assert!(TargetStatus::Error { reason: ErrorReason::SpawnFailed }.accepts_start());
        for status in [
            TargetStatus::Resolving,
            TargetStatus::Launching,
            TargetStatus::Running,
            TargetStatus::Stopping,
        ] {
            assert!(!status.accepts_start());
            assert!(status.is_active());
        }
    }

    #[test]
    fn target_defaults_fill_missing_fields() {
        let json = serde_json::json!({
            "id": "t1",
            "owner_id": 7,
            "host": "play.example.net",
            "port": 25565,
            "name": "S-1",
            "created_at": "2024-05-01T10:00:00Z",
        });
        let target: ManagedTarget = serde_json::from_value(json).unwrap();
        assert_eq!(target.kind, TargetKind::Java);
        assert_eq!(target.status, TargetStatus::Idle);
        assert_eq!(target.worker_pid, None);
        assert!(!target.auto_restart);
        assert_eq!(target.address(), "play.example.net:25565");
    }

    #[test]
    fn global_settings_keeps_unknown_keys() {
        let json = serde_json::json!({
            "id": "global",
            "requirements": ["@news"],
            "welcome_banner": "hi",
        });
        let settings: GlobalSettings = serde_json::from_value(json).unwrap();
        assert!(settings.service_enabled);
        assert_eq!(settings.requirements, vec!["@news".to_string()]);
        assert_eq!(settings.extra.get("welcome_banner"), Some(&serde_json::json!("hi")));
    }

    #[test]
    fn only_java_is_supported() {
        assert!(TargetKind::Java.is_supported());
        assert!(!TargetKind::Bedrock.is_supported());
        assert_eq!(TargetKind::Java.protocol_family(), "java");
    }
}
