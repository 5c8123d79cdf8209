//! Daemon settings
//!
//! Loaded once at startup from `<config_dir>/keepalive/settings.json`.
//! A missing file yields defaults; a malformed one is recovered field by
//! field so a single bad value never discards the rest.

use crate::records::targets::TargetLimits;
use crate::store::StoreOptions;
use crate::supervisor::SupervisorConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATA_DIR: &str = "KEEPALIVE_DATA_DIR";
pub const ENV_LISTEN: &str = "KEEPALIVE_LISTEN";
pub const ENV_WORKER_BIN: &str = "KEEPALIVE_WORKER_BIN";

/// File name of the worker runtime binary, looked up next to the daemon.
const WORKER_BIN_NAME: &str = if cfg!(windows) { "keepalive-worker.exe" } else { "keepalive-worker" };

fn default_flush_debounce_ms() -> u64 {
    500
}

fn default_restart_delay_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_listen_address() -> String {
    "127.0.0.1:19300".to_string()
}

fn default_max_targets_per_owner() -> usize {
    3
}

fn default_account_cache_ttl_secs() -> u64 {
    60
}

fn default_account_cache_capacity() -> usize {
    1024
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Where collection files live (default: `<config_dir>/keepalive/data`)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Quiet period before dirty collections are written
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,
    /// Backoff before an auto-restart
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// How long a start waits for a signaled worker to exit
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Worker runtime binary (default: `keepalive-worker` next to the daemon)
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_max_targets_per_owner")]
    pub max_targets_per_owner: usize,
    #[serde(default = "default_account_cache_ttl_secs")]
    pub account_cache_ttl_secs: u64,
    #[serde(default = "default_account_cache_capacity")]
    pub account_cache_capacity: usize,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            flush_debounce_ms: default_flush_debounce_ms(),
            restart_delay_ms: default_restart_delay_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            worker_program: None,
            listen_address: default_listen_address(),
            max_targets_per_owner: default_max_targets_per_owner(),
            account_cache_ttl_secs: default_account_cache_ttl_secs(),
            account_cache_capacity: default_account_cache_capacity(),
        }
    }
}

impl DaemonSettings {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| get_config_dir().join("data"))
    }

    pub fn worker_program(&self) -> PathBuf {
        if let Some(program) = &self.worker_program {
            return program.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BIN_NAME)))
            .unwrap_or_else(|| PathBuf::from(WORKER_BIN_NAME))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            flush_debounce: Duration::from_millis(self.flush_debounce_ms),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    pub fn target_limits(&self) -> TargetLimits {
        TargetLimits { max_per_owner: self.max_targets_per_owner }
    }

    pub fn account_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.account_cache_ttl_secs)
    }

    /// Apply `KEEPALIVE_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(listen) = lookup(ENV_LISTEN).filter(|v| !v.is_empty()) {
            self.listen_address = listen;
        }
        if let Some(program) = lookup(ENV_WORKER_BIN).filter(|v| !v.is_empty()) {
            self.worker_program = Some(PathBuf::from(program));
        }
    }
}

pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("keepalive")
}

pub fn get_settings_path() -> PathBuf {
    get_config_dir().join("settings.json")
}

/// Load settings from the default location and apply environment overrides.
pub fn load_settings() -> DaemonSettings {
    let mut settings = load_settings_from(&get_settings_path());
    settings.apply_env_overrides(|key| std::env::var(key).ok());
    settings
}

pub fn load_settings_from(path: &Path) -> DaemonSettings {
    if !path.exists() {
        log::info!("Settings file not found at {}, using defaults", path.display());
        return DaemonSettings::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::error!("Failed to read settings file {}: {}", path.display(), e);
            return DaemonSettings::default();
        }
    };

    match serde_json::from_str::<DaemonSettings>(&content) {
        Ok(settings) => return settings,
        Err(e) => {
            log::warn!("Failed to parse settings directly: {}, attempting partial recovery", e);
        }
    }

    match recover_settings_from_json(&content) {
        Ok(settings) => {
            log::info!("Recovered settings with partial data");
            settings
        }
        Err(e) => {
            log::error!("Failed to recover settings from {}: {}", path.display(), e);
            DaemonSettings::default()
        }
    }
}

/// Copy one field out of `obj` if it deserializes, otherwise keep the default.
macro_rules! recover_field {
    ($obj:expr, $settings:expr, $field:ident) => {
        if let Some(v) = $obj.get(stringify!($field)) {
            match serde_json::from_value(v.clone()) {
                Ok(parsed) => $settings.$field = parsed,
                Err(_) => log::warn!("Could not parse {}, using default", stringify!($field)),
            }
        }
    };
}

fn recover_settings_from_json(content: &str) -> Result<DaemonSettings> {
    let value: serde_json::Value =
        serde_json::from_str(content).context("Settings file is not valid JSON")?;
    let obj = value
        .as_object()
        .context("Settings file root is not a JSON object")?;

    let mut settings = DaemonSettings::default();
    recover_field!(obj, settings, data_dir);
    recover_field!(obj, settings, flush_debounce_ms);
    recover_field!(obj, settings, restart_delay_ms);
    recover_field!(obj, settings, probe_timeout_ms);
    recover_field!(obj, settings, drain_timeout_ms);
    recover_field!(obj, settings, worker_program);
    recover_field!(obj, settings, listen_address);
    recover_field!(obj, settings, max_targets_per_owner);
    recover_field!(obj, settings, account_cache_ttl_secs);
    recover_field!(obj, settings, account_cache_capacity);
    Ok(settings)
}
