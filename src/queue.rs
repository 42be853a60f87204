//! An ordered sequence of file-state records awaiting background
//! compression.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::state::FileState;

pub struct CompressionQueue {
    deque: Mutex<VecDeque<Arc<FileState>>>,
    notify: Notify,
}

impl Default for CompressionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionQueue {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a record already marked `queued` by its caller under the
    /// record's own lock (registry.rs `release`/`drain_force`).
    pub async fn push(&self, state: Arc<FileState>) {
        let mut deque = self.deque.lock().await;
        deque.push_back(state);
        self.notify.notify_one();
    }

    /// Blocks until a record is available, then dequeues it. `Notify`
    /// stores a wakeup permit when `notify_one` fires with no waiter
    /// registered yet, so a push between our empty-check and the
    /// `notified().await` below is never missed.
    pub async fn pop(&self) -> Arc<FileState> {
        loop {
            {
                let mut deque = self.deque.lock().await;
                if let Some(state) = deque.pop_front() {
                    return state;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.deque.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.deque.lock().await.is_empty()
    }
}
