mod control;
mod process;
mod records;
mod settings;
mod store;
mod supervisor;

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;

use crate::control::{AppState, ControlServer};
use crate::store::DocumentStore;
use crate::supervisor::{OsSpawner, StatusPingProbe, Supervisor};
use keepalive_core::types::ALL_COLLECTIONS;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let settings = settings::load_settings();
    let data_dir = settings.data_dir();
    log::info!("Using data directory {}", data_dir.display());

    let store = DocumentStore::open(&data_dir, ALL_COLLECTIONS, settings.store_options())
        .context("Failed to initialize storage")?;
    store.spawn_flusher();

    let worker_program = settings.worker_program();
    log::info!("Worker program: {}", worker_program.display());
    let supervisor = Supervisor::new(
        store.clone(),
        Arc::new(OsSpawner::new(worker_program)),
        Arc::new(StatusPingProbe),
        settings.supervisor_config(),
    );

    let state = AppState::new(
        store.clone(),
        supervisor.clone(),
        settings.target_limits(),
        settings.account_cache_ttl(),
        settings.account_cache_capacity,
    );
    supervisor.recover();

    let mut server = match ControlServer::start(&settings.listen_address, state).await {
        Ok(server) => server,
        Err(e) => {
            supervisor.shutdown();
            store.shutdown();
            return Err(e);
        }
    };
    log::info!("Control API ready on http://{}", server.local_addr());

    shutdown_signal().await;
    log::info!("Shutting down");

    supervisor.shutdown();
    server.stop().await;
    let report = store.shutdown();
    if !report.failed.is_empty() {
        log::error!("Collections not persisted on shutdown: {:?}", report.failed);
    }
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
