use crate::types::TargetStatus;
use crate::worker::WorkerExit;
use serde::{Deserialize, Serialize};

/// Result of asking the supervisor to start a target's worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A worker process was spawned.
    Started { pid: u32 },
    /// A live worker exists or another start is in flight.
    AlreadyRunning,
    /// The target's kind is no longer supported.
    UnsupportedKind,
    /// The discovered protocol is not in the version table.
    UnsupportedVersion { protocol: i32 },
    /// The discovery probe failed or timed out.
    Unreachable,
    /// The worker process could not be spawned.
    SpawnFailed,
    /// No target with that id.
    NotFound,
    /// The target was stopped or deleted while the start was in flight.
    Cancelled,
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started { .. })
    }
}

/// Progress reported while a start is in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StartProgress {
    Resolving,
    Launching { version: String },
}

/// A target's persisted status changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub target_id: String,
    pub owner_id: i64,
    pub status: TargetStatus,
}

/// A worker exited on its own while `notify_on_failure` was set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub target_id: String,
    pub owner_id: i64,
    pub name: String,
    pub address: String,
    pub exit: WorkerExit,
    /// Whether an auto-restart has been scheduled.
    pub will_restart: bool,
}
