//! On unmount, drains every pending compression before the process exits,
//! so a crash or `SIGTERM` never leaves a file half-rewritten.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::background::BackgroundCompressor;
use crate::engine::Engine;

/// One second between drain-loop polls, interruptible
/// by the drain loop simply re-checking emptiness each iteration rather than
/// by a signal — there is nothing else the drain loop can usefully do while
/// waiting for in-flight compressions to finish.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ShutdownCoordinator {
    draining: AtomicBool,
    worker: Arc<BackgroundCompressor>,
}

impl ShutdownCoordinator {
    pub fn new(worker: Arc<BackgroundCompressor>) -> Self {
        Self { draining: AtomicBool::new(false), worker }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run the full shutdown sequence: signal draining,
    /// push every eligible idle record into the compression queue and wait
    /// for the worker to empty it, then cancel and join the worker.
    pub async fn shutdown(&self, engine: &Arc<Engine>, worker_handle: tokio::task::JoinHandle<()>) {
        self.draining.store(true, Ordering::Release);
        info!("draining compression queue before unmount");

        loop {
            let registry_empty = engine.record_count().await == 0;
            let queue_empty = engine.queue_len().await == 0;
            if registry_empty && queue_empty {
                break;
            }
            let pushed = engine.registry.drain_force(&engine.queue).await;
            if pushed > 0 {
                info!(pushed, "queued remaining files for background compression");
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!("finished compressing background files");
        self.worker.request_stop();
        if let Err(err) = worker_handle.await {
            tracing::warn!(?err, "background worker task panicked during shutdown");
        }
    }
}
