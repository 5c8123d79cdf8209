use crate::connector::{Connector, Disconnect};
use keepalive_core::worker::{EXIT_FAILURE, EXIT_OK};
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    pub label: String,
    pub version: String,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
}

/// Connect, hold the session, and retry once after a kick or ban.
///
/// Returns the process exit code. `shutdown` resolving at any point ends the
/// run with [`EXIT_OK`].
pub async fn run(connector: &dyn Connector, config: &RuntimeConfig, shutdown: impl Future<Output = ()>) -> i32 {
    tokio::pin!(shutdown);
    let mut retry_used = false;

    loop {
        log::info!(
            "[{}] Connecting to {}:{} ({})",
            config.label,
            config.host,
            config.port,
            config.version
        );
        let connected = tokio::select! {
            _ = &mut shutdown => return EXIT_OK,
            result = connector.connect(&config.host, config.port, config.connect_timeout) => result,
        };
        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                log::error!("[{}] Connection failed: {}", config.label, e);
                return EXIT_FAILURE;
            }
        };
        log::info!("[{}] Connected", config.label);

        let disconnect = tokio::select! {
            _ = &mut shutdown => {
                log::info!("[{}] Shutting down", config.label);
                return EXIT_OK;
            }
            disconnect = session.run() => disconnect,
        };
        drop(session);

        match disconnect {
            Disconnect::Ended => {
                log::info!("[{}] Session ended", config.label);
                return EXIT_OK;
            }
            Disconnect::Error(message) => {
                log::error!("[{}] Connection error: {}", config.label, message);
                return EXIT_FAILURE;
            }
            Disconnect::Kicked(reason) | Disconnect::Banned(reason) if !retry_used => {
                retry_used = true;
                log::warn!(
                    "[{}] Disconnected ({}), reconnecting in {:?}",
                    config.label,
                    reason,
                    config.retry_delay
                );
                tokio::select! {
                    _ = &mut shutdown => return EXIT_OK,
                    _ = tokio::time::sleep(config.retry_delay) => {}
                }
            }
            Disconnect::Kicked(reason) | Disconnect::Banned(reason) => {
                log::error!("[{}] Disconnected again ({}), giving up", config.label, reason);
                return EXIT_FAILURE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectError, Session};
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plays back one scripted result per connect attempt.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Result<Disconnect, String>>>,
        attempts: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(script: Vec<Result<Disconnect, String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    struct ScriptedSession(Option<Disconnect>);

    impl Session for ScriptedSession {
        fn run(&mut self) -> BoxFuture<'_, Disconnect> {
            match self.0.take() {
                Some(disconnect) => async move { disconnect }.boxed(),
                // Holds forever, like a healthy connection
                None => futures::future::pending().boxed(),
            }
        }
    }

    impl Connector for ScriptedConnector {
        fn connect(
            &self,
            _host: &str,
            _port: u16,
            _timeout: Duration,
        ) -> BoxFuture<'static, Result<Box<dyn Session>, ConnectError>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            async move {
                match next {
                    Some(Ok(disconnect)) => Ok(Box::new(ScriptedSession(Some(disconnect))) as Box<dyn Session>),
                    Some(Err(message)) => Err(ConnectError::Io(std::io::Error::other(message))),
                    None => Ok(Box::new(ScriptedSession(None)) as Box<dyn Session>),
                }
            }
            .boxed()
        }
    }

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            host: "play.example.net".into(),
            port: 25565,
            label: "bot".into(),
            version: "1.20.4".into(),
            retry_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn initial_connect_failure_exits_non_zero() {
        let connector = ScriptedConnector::new(vec![Err("refused".into())]);
        assert_eq!(run(&connector, &config(), futures::future::pending()).await, EXIT_FAILURE);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clean_end_exits_zero() {
        let connector = ScriptedConnector::new(vec![Ok(Disconnect::Ended)]);
        assert_eq!(run(&connector, &config(), futures::future::pending()).await, EXIT_OK);
    }

    #[tokio::test]
    async fn error_exits_non_zero_without_retry() {
        let connector = ScriptedConnector::new(vec![Ok(Disconnect::Error("reset".into()))]);
        assert_eq!(run(&connector, &config(), futures::future::pending()).await, EXIT_FAILURE);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn kick_is_retried_exactly_once() {
        let connector = ScriptedConnector::new(vec![
            Ok(Disconnect::Kicked("afk".into())),
            Ok(Disconnect::Banned("nope".into())),
        ]);
        assert_eq!(run(&connector, &config(), futures::future::pending()).await, EXIT_FAILURE);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn kick_then_clean_end_exits_zero() {
        let connector = ScriptedConnector::new(vec![Ok(Disconnect::Kicked("restart".into())), Ok(Disconnect::Ended)]);
        assert_eq!(run(&connector, &config(), futures::future::pending()).await, EXIT_OK);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_reconnect_exits_non_zero() {
        let connector = ScriptedConnector::new(vec![Ok(Disconnect::Kicked("afk".into())), Err("refused".into())]);
        assert_eq!(run(&connector, &config(), futures::future::pending()).await, EXIT_FAILURE);
    }

    #[tokio::test]
    async fn shutdown_ends_a_held_session() {
        // Empty script: the first session holds forever
        let connector = ScriptedConnector::new(Vec::new());
        let shutdown = tokio::time::sleep(Duration::from_millis(20));
        assert_eq!(run(&connector, &config(), shutdown).await, EXIT_OK);
    }

    #[tokio::test]
    async fn shutdown_during_retry_delay_exits_zero() {
        let connector = ScriptedConnector::new(vec![Ok(Disconnect::Kicked("afk".into()))]);
        let config = RuntimeConfig { retry_delay: Duration::from_secs(60), ..config() };
        let shutdown = tokio::time::sleep(Duration::from_millis(20));
        assert_eq!(run(&connector, &config, shutdown).await, EXIT_OK);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }
}
