//! A single worker task draining the compression queue, deferred-compressing
//! quiescent files the foreground path declined to bind a codec to
//! immediately.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::codec::CancelCookie;
use crate::engine::Engine;

/// Owns the worker's cancel cookie and its stop signal. The cookie is
/// polled by codec `compress` calls mid-flight; the `Notify` wakes the
/// worker out of an otherwise indefinite wait on the empty compression
/// queue once [`crate::shutdown::ShutdownCoordinator`] is ready for it to
/// exit.
pub struct BackgroundCompressor {
    cancel: CancelCookie,
    stop: Notify,
}

impl Default for BackgroundCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundCompressor {
    pub fn new() -> Self {
        Self { cancel: CancelCookie::new(), stop: Notify::new() }
    }

    pub fn cancel_cookie(&self) -> CancelCookie {
        self.cancel.clone()
    }

    /// Set the cancel cookie and wake the worker, whether it is mid-compress
    /// or parked waiting on the queue.
    pub fn request_stop(&self) {
        self.cancel.cancel();
        self.stop.notify_one();
    }

    /// Spawn the worker loop as a dedicated task. Returns the join handle
    /// so the shutdown coordinator can await it.
    pub fn spawn(self: Arc<Self>, engine: Arc<Engine>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    state = engine.queue.pop() => {
                        let path = state.inner.lock().await.path.clone();
                        debug!(path = %path.display(), "background compressor picked up record");
                        engine.compress_background(state, &self.cancel).await;
                    }
                    _ = self.stop.notified() => {
                        trace!("background worker stopping");
                        break;
                    }
                }
            }
        })
    }
}
