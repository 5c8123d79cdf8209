use futures::FutureExt;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Why an established session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// Removed by the server; eligible for the single retry.
    Kicked(String),
    /// Banned by the server; eligible for the single retry.
    Banned(String),
    /// Clean end of session.
    Ended,
    Error(String),
}

impl Disconnect {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Disconnect::Kicked(_) | Disconnect::Banned(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An established connection to the remote target.
pub trait Session: Send {
    /// Hold the connection until it ends.
    fn run(&mut self) -> BoxFuture<'_, Disconnect>;
}

/// Opens sessions against a remote target.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Box<dyn Session>, ConnectError>>;
}

/// Holds a plain TCP connection open and drains whatever the server sends.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<Box<dyn Session>, ConnectError>> {
        let host = host.to_string();
        async move {
            let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
                .await
                .map_err(|_| ConnectError::Timeout(timeout))??;
            stream.set_nodelay(true)?;
            Ok(Box::new(TcpSession { stream }) as Box<dyn Session>)
        }
        .boxed()
    }
}

struct TcpSession {
    stream: TcpStream,
}

impl Session for TcpSession {
    fn run(&mut self) -> BoxFuture<'_, Disconnect> {
        async move {
            let mut buf = [0u8; 4096];
            loop {
                match self.stream.read(&mut buf).await {
                    Ok(0) => return Disconnect::Kicked("closed by remote".into()),
                    Ok(_) => continue,
                    Err(e) => return Disconnect::Error(e.to_string()),
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn remote_close_is_a_kick() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut session = TcpConnector
            .connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(session.run().await, Disconnect::Kicked("closed by remote".into()));
    }

    #[test]
    fn only_kicks_and_bans_are_retryable() {
        assert!(Disconnect::Kicked("afk".into()).is_retryable());
        assert!(Disconnect::Banned("nope".into()).is_retryable());
        assert!(!Disconnect::Ended.is_retryable());
        assert!(!Disconnect::Error("reset".into()).is_retryable());
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpConnector.connect("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ConnectError::Io(_))));
    }
}
