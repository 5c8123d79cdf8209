use crate::control::{build_router, AppState};
use anyhow::Context;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to the running control server.
pub struct ControlServer {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    addr: SocketAddr,
}

impl ControlServer {
    /// Bind `listen_address` and serve the control API on the current runtime.
    pub async fn start(listen_address: &str, state: AppState) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind(listen_address)
            .await
            .with_context(|| format!("Failed to bind control server to {}", listen_address))?;
        let addr = listener.local_addr()?;
        log::info!("Control server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = build_router(state);

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(shutdown_rx))
                .await
            {
                log::error!("Control server failed: {}", e);
            }
            log::info!("Control server shut down");
        });

        Ok(Self {
            shutdown_tx,
            task: Some(task),
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("Control server task ended abnormally: {}", e);
            }
        }
    }
}

/// Wait until the shutdown signal is received.
async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::test_support;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn serves_health_and_stops() {
        let (_dir, state) = test_support::state();
        let mut server = ControlServer::start("127.0.0.1:0", state).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains(r#""status":"ok""#));

        server.stop().await;
        assert!(tokio::net::TcpStream::connect(server.local_addr()).await.is_err());
    }
}
