use crate::runtime::RuntimeConfig;
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "keepalive-worker", about = "Keep one connection to a game server open")]
pub struct WorkerArgs {
    /// Remote host
    #[arg(long)]
    pub host: String,

    /// Remote port
    #[arg(long)]
    pub port: u16,

    /// Name shown for this worker
    #[arg(long)]
    pub label: String,

    /// Release name resolved by the supervisor's discovery probe
    #[arg(long)]
    pub version: String,

    /// Delay before the single reconnect after a kick
    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub retry_delay_ms: u64,

    #[arg(long, value_name = "MS", default_value_t = 10000)]
    pub connect_timeout_ms: u64,
}

impl WorkerArgs {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            host: self.host.clone(),
            port: self.port,
            label: self.label.clone(),
            version: self.version.clone(),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepalive_core::worker::LaunchSpec;

    #[test]
    fn parses_supervisor_launch_args() {
        let spec = LaunchSpec {
            target_id: "t1".into(),
            host: "play.example.net".into(),
            port: 25565,
            label: "afk-bot".into(),
            version: "1.20.4".into(),
        };
        let argv = std::iter::once("keepalive-worker".to_string()).chain(spec.to_args());

        let args = WorkerArgs::try_parse_from(argv).unwrap();
        let config = args.runtime_config();
        assert_eq!(config.host, "play.example.net");
        assert_eq!(config.port, 25565);
        assert_eq!(config.label, "afk-bot");
        assert_eq!(config.version, "1.20.4");
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn missing_host_is_rejected() {
        assert!(WorkerArgs::try_parse_from(["keepalive-worker", "--port", "1"]).is_err());
    }
}
