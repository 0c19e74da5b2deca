use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::sync::JobOrchestrator;

/// Background worker that periodically nudges every unsettled job.
///
/// Jobs otherwise only advance when someone calls in. The sweeper picks up
/// jobs left pending after a restart and rechecks imports in monitoring.
pub struct ResumeSweeper {
    orchestrator: Arc<JobOrchestrator>,
    interval: Duration,
}

impl ResumeSweeper {
    pub fn new(orchestrator: Arc<JobOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Runs until `shutdown_rx` turns true or its sender is dropped.
    ///
    /// Drivers already started keep running; only new sweeps stop.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Resume sweeper started, sweeping every {:?}", self.interval);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.orchestrator.resume_unsettled().await {
                Ok(0) => debug!("Resume sweep found no unsettled jobs"),
                Ok(n) => info!("Resume sweep touched {} unsettled jobs", n),
                Err(e) => error!("Resume sweep failed: {}", e),
            }
        }

        info!("Resume sweeper stopped");
    }
}
