//! The interned per-path record and the bits it tracks.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, Notify};

use crate::codec::CodecId;

bitflags::bitflags! {
    /// Bitset over {COMPRESSING, DECOMPRESSING, CANCEL}.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const COMPRESSING = 0b001;
        const DECOMPRESSING = 0b010;
        const CANCEL = 0b100;
    }
}

/// Authoritative uncompressed logical size, or the "refetch" sentinel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileSize {
    Invalid,
    Known(u64),
}

impl FileSize {
    pub fn get(self) -> Option<u64> {
        match self {
            FileSize::Invalid => None,
            FileSize::Known(size) => Some(size),
        }
    }
}

/// Opaque handle into the engine's descriptor table. The file-state record
/// holds ids, not `Arc<Descriptor>`, so eviction never races a live
/// back-reference.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub u64);

/// Every mutable field of a file-state record, guarded by [`FileState`]'s
/// own mutex. No operation outside that lock may read or mutate any field
/// here.
pub struct FileStateInner {
    pub path: PathBuf,
    pub path_hash: u64,
    pub inode: u64,
    pub nlink: u32,
    pub deleted: bool,
    pub accesses: u32,
    pub size: FileSize,
    pub codec: Option<CodecId>,
    pub skipped: u64,
    pub dontcompress: bool,
    pub status: StatusFlags,
    pub descriptors: Vec<DescriptorId>,
    /// Already sitting in the `CompressionQueue`; prevents double-enqueue.
    pub queued: bool,
}

/// The interned per-path record itself: `FileStateInner` behind a lock plus
/// a `Notify` standing in for the original's condition variable, used to
/// hand a record off to the background compressor.
///
/// The decompressed-page cache the original implementation kept alongside
/// this record is omitted entirely rather than carried as a half-implemented
/// stub — see DESIGN.md.
pub struct FileState {
    pub inner: Mutex<FileStateInner>,
    pub notify: Notify,
}

impl FileState {
    pub fn new(path: PathBuf) -> Self {
        let path_hash = hash_path(&path);
        Self {
            inner: Mutex::new(FileStateInner {
                path,
                path_hash,
                inode: 0,
                nlink: 1,
                deleted: false,
                accesses: 0,
                size: FileSize::Invalid,
                codec: None,
                skipped: 0,
                dontcompress: false,
                status: StatusFlags::empty(),
                descriptors: Vec::new(),
                queued: false,
            }),
            notify: Notify::new(),
        }
    }
}

pub fn hash_path(path: &Path) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}
