//! Contract between the supervisor and the worker client runtime.
//!
//! The supervisor launches the worker with the flags built by
//! [`LaunchSpec::to_args`] and only ever looks at how the process exits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Benign disconnect or requested shutdown.
pub const EXIT_OK: i32 = 0;
/// Connection failed or the single retry was already used.
pub const EXIT_FAILURE: i32 = 1;

/// Everything a worker needs to connect to one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    pub target_id: String,
    pub host: String,
    pub port: u16,
    pub label: String,
    /// Release name resolved by the discovery probe.
    pub version: String,
}

impl LaunchSpec {
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--label".to_string(),
            self.label.clone(),
            "--version".to_string(),
            self.version.clone(),
        ]
    }
}

/// How a worker process ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerExit {
    pub code: Option<i32>,
    /// Terminating signal on Unix, if the process did not exit normally.
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code), signal: None }
    }

    pub fn signaled(signal: i32) -> Self {
        Self { code: None, signal: Some(signal) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(EXIT_OK)
    }
}

impl From<std::process::ExitStatus> for WorkerExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self { code: status.code(), signal: status.signal() }
        }
        #[cfg(not(unix))]
        {
            Self { code: status.code(), signal: None }
        }
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit"),
        }
    }
}
