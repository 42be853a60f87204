//! Per-open-handle state attached to a file-state record.

use std::fs::File;
use std::sync::Arc;

use crate::codec::{StreamReader, StreamWriter};
use crate::state::{DescriptorId, FileState};

/// The codec stream handle a descriptor may be holding. A descriptor uses
/// at most one direction at a time: FUSE opens are read-only, write-only,
/// or read-write, and the direct I/O engine only ever drives the direction
/// the caller is currently using.
pub enum CodecStream {
    Reader(Box<dyn StreamReader>),
    Writer(Box<dyn StreamWriter>),
}

/// Remembered open flags: write-only opens are upgraded to
/// read-write since the header must be read even for writers; append opens
/// have `O_APPEND` stripped since FUSE always supplies absolute offsets.
#[derive(Debug, Copy, Clone, Default)]
pub struct DescriptorFlags {
    pub readable: bool,
    pub writable: bool,
}

/// One open handle. Holds an `Arc<FileState>` back-pointer — safe because
/// the reverse direction (file-state -> descriptor) only stores
/// [`DescriptorId`]s, so there is no reference cycle.
pub struct Descriptor {
    pub id: DescriptorId,
    pub state: Arc<FileState>,
    pub file: File,
    pub flags: DescriptorFlags,
    pub stream: Option<CodecStream>,
    /// Logical stream offset: the next byte this descriptor expects to
    /// read or append at, used to detect non-sequential access.
    pub offset: u64,
}

impl Descriptor {
    pub fn new(id: DescriptorId, state: Arc<FileState>, file: File, flags: DescriptorFlags) -> Self {
        Self {
            id,
            state,
            file,
            flags,
            stream: None,
            offset: 0,
        }
    }
}
