//! The single explicitly-constructed bundle of both registries, the
//! default codec, policy, and descriptor table that every filesystem
//! operation and every test fixture is built around.

mod io;
pub mod ops;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::codec::{CodecId, CodecRegistry};
use crate::descriptor::Descriptor;
use crate::error::{FsError, FsResult};
use crate::policy::Policy;
use crate::queue::CompressionQueue;
use crate::registry::FileStateRegistry;
use crate::state::{DescriptorId, FileState};

/// The process-wide shared state, collapsed into one explicitly
/// constructed value rather than ambient globals.
pub struct Engine {
    pub root: PathBuf,
    pub registry: FileStateRegistry,
    pub queue: CompressionQueue,
    pub codecs: CodecRegistry,
    pub policy: Policy,
    pub default_codec: CodecId,
    descriptors: Mutex<HashMap<DescriptorId, Descriptor>>,
    next_descriptor: AtomicU64,
}

impl Engine {
    pub fn new(root: PathBuf, default_codec: CodecId, level: u32, policy: Policy) -> Arc<Self> {
        Arc::new(Self {
            root,
            registry: FileStateRegistry::new(),
            queue: CompressionQueue::new(),
            codecs: CodecRegistry::new(level),
            policy,
            default_codec,
            descriptors: Mutex::new(HashMap::new()),
            next_descriptor: AtomicU64::new(1),
        })
    }

    /// Resolve a path relative to the backing directory. FUSE hands us
    /// paths relative to the mount root; the engine always operates
    /// relative to `root` (the process `fchdir`s into the backing
    /// directory at startup so callers may also pass relative paths
    /// directly).
    pub fn backing_path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            self.root.join(relative.strip_prefix("/").unwrap_or(relative))
        } else {
            self.root.join(relative)
        }
    }

    fn next_descriptor_id(&self) -> DescriptorId {
        DescriptorId(self.next_descriptor.fetch_add(1, Ordering::Relaxed))
    }

    async fn descriptor_state(&self, id: DescriptorId) -> FsResult<Arc<FileState>> {
        let table = self.descriptors.lock().await;
        table.get(&id).map(|d| d.state.clone()).ok_or(FsError::Invalid)
    }

    /// Sibling temp-file path using the filesystem's own hidden-name
    /// prefix.
    fn temp_path_for(&self, path: &Path) -> PathBuf {
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let mut tmp = path.to_path_buf();
        tmp.set_file_name(format!("._.tmp.{file_name}"));
        tmp
    }

    pub async fn record_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    /// Run one iteration of the background compressor's eligibility check
    /// and rewrite cycle against `state`. Shared by `background.rs`'s
    /// worker loop and `shutdown.rs`'s drain.
    pub(crate) async fn compress_background(&self, state: Arc<FileState>, cancel: &crate::codec::CancelCookie) {
        if let Err(err) = self.compress_full(&state, cancel).await {
            debug!(error = %err, "background compression skipped");
        }
        self.registry.finish_background(&state).await;
    }
}
