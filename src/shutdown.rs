use actix_web::dev::ServerHandle;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::ProgressStore;
use crate::sync::JobOrchestrator;

/// Brings the service down on CTRL+C or SIGTERM.
///
/// Order matters: no new requests, no new sweeps, no new chunks. Chunks
/// still polling the destination are parked in monitoring so the next
/// process rechecks them, then the store is closed last.
pub struct ShutdownCoordinator {
    server_handle: ServerHandle,
    server_task: JoinHandle<Result<(), std::io::Error>>,
    worker_handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    orchestrator: Arc<JobOrchestrator>,
    store: Arc<dyn ProgressStore>,
}

impl ShutdownCoordinator {
    pub fn new(
        server_handle: ServerHandle,
        server_task: JoinHandle<Result<(), std::io::Error>>,
        worker_handles: Vec<JoinHandle<()>>,
        shutdown_tx: watch::Sender<bool>,
        orchestrator: Arc<JobOrchestrator>,
        store: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            server_handle,
            server_task,
            worker_handles,
            shutdown_tx,
            orchestrator,
            store,
        }
    }

    /// Blocks until a termination signal arrives, then runs the shutdown
    /// sequence. SIGTERM is only listened for on Unix.
    pub async fn wait_for_shutdown(self) -> Result<(), std::io::Error> {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C signal handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received CTRL+C signal, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
        }

        self.shutdown().await
    }

    async fn shutdown(self) -> Result<(), std::io::Error> {
        info!("Stopping HTTP server (no longer accepting new requests)...");
        self.server_handle.stop(true).await;
        info!("HTTP server stopped accepting new requests");

        info!("Signaling background workers to stop...");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal to workers: {:?}", e);
        }

        let num_workers = self.worker_handles.len();
        info!("Waiting for {} background workers to exit...", num_workers);
        let mut completed = 0;
        for (i, handle) in self.worker_handles.into_iter().enumerate() {
            match handle.await {
                Ok(_) => {
                    completed += 1;
                    info!("Worker {} stopped ({}/{})", i + 1, completed, num_workers);
                }
                Err(e) => error!("Worker {} failed to stop: {:?}", i + 1, e),
            }
        }

        // Drivers still write progress, so they go before the store closes
        self.orchestrator.shutdown().await;

        info!("Waiting for HTTP server to fully shut down...");
        match self.server_task.await {
            Ok(Ok(_)) => info!("HTTP server shut down successfully"),
            Ok(Err(e)) => error!("HTTP server encountered error during shutdown: {:?}", e),
            Err(e) => error!("HTTP server task panicked: {:?}", e),
        }

        info!("Closing progress store...");
        self.store.close().await;
        info!("Progress store closed");

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
