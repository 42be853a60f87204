//! Error taxonomy for the compressing passthrough filesystem.
//!
//! A plain `Copy` enum translated to a POSIX errno at the FUSE boundary,
//! rather than a `thiserror`/`anyhow` tree.

use std::io;

/// Convenient result alias used throughout the engine.
pub type FsResult<T> = Result<T, FsError>;

/// Error kinds surfaced to callers, translated to negative OS error codes at
/// the `fuser` boundary (see [`FsError::to_errno`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FsError {
    /// Path does not exist.
    NotFound,
    /// Underlying permission error.
    PermissionDenied,
    /// Header malformed, truncated, or codec failure during decompress.
    Io,
    /// Caller named a path or handle that has been tombstoned.
    Stale,
    /// Destination of a create-exclusive or link already exists.
    Exists,
    /// Operation not valid for this object (e.g. rmdir on a non-directory).
    NotDirectory,
    /// Operation requires a directory but got one.
    IsDirectory,
    /// Directory is not empty.
    NotEmpty,
    /// Invalid argument (bad offset, name too long, cross-device rename).
    Invalid,
    /// Backing filesystem is full or quota exceeded.
    NoSpace,
    /// Backing filesystem is mounted read-only.
    ReadOnly,
    /// Resource exhaustion while building a descriptor.
    NoMemory,
    /// Operation not supported by this filesystem.
    NotSupported,
}

impl FsError {
    /// Translate to the POSIX errno `fuser` reply objects expect.
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::PermissionDenied => libc::EACCES,
            FsError::Io => libc::EIO,
            FsError::Stale => libc::ESTALE,
            FsError::Exists => libc::EEXIST,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::Invalid => libc::EINVAL,
            FsError::NoSpace => libc::ENOSPC,
            FsError::ReadOnly => libc::EROFS,
            FsError::NoMemory => libc::ENOMEM,
            FsError::NotSupported => libc::ENOSYS,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        map_io_error(&err)
    }
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for FsError {}

/// Map a host `io::Error` to the closest filesystem error code.
pub fn map_io_error(err: &io::Error) -> FsError {
    use io::ErrorKind::*;
    match err.kind() {
        NotFound => FsError::NotFound,
        PermissionDenied => FsError::PermissionDenied,
        AlreadyExists => FsError::Exists,
        InvalidInput | InvalidData => FsError::Invalid,
        NotADirectory => FsError::NotDirectory,
        IsADirectory => FsError::IsDirectory,
        ReadOnlyFilesystem => FsError::ReadOnly,
        StorageFull | OutOfMemory => FsError::NoSpace,
        _ => {
            if let Some(code) = err.raw_os_error() {
                match code {
                    libc::ENOTEMPTY => return FsError::NotEmpty,
                    libc::ESTALE => return FsError::Stale,
                    _ => {}
                }
            }
            FsError::Io
        }
    }
}
