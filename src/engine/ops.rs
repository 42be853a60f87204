//! The non-read/write operations (`getattr`, `readdir`, `rename`, `unlink`,
//! `link`, and the plain directory-entry passthroughs) expressed as engine
//! methods, so `fs.rs` only has to translate `fuser` types and never touch
//! a registry or the backing filesystem directly.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::error::{FsError, FsResult};
use crate::header::{Header, HEADER_LEN};
use crate::state::FileSize;

use super::Engine;

/// Everything `fs.rs` needs to build a `fuser::FileAttr`: the raw `lstat`
/// plus the logical (post-decompression) size when it differs from the
/// on-disk length.
pub struct Attr {
    pub metadata: Metadata,
    pub logical_size: u64,
}

impl Engine {
    /// Mirrors the original's `fusecompress_getattr`: non-regular files
    /// are returned as-is; regular files consult the
    /// file-state record (refetching from the header when `size` is the
    /// "invalid" sentinel) so the kernel sees the uncompressed length.
    pub async fn getattr(&self, relative: &Path) -> FsResult<Attr> {
        let path = self.backing_path(relative);
        let metadata = std::fs::symlink_metadata(&path).map_err(FsError::from)?;
        if !metadata.is_file() {
            let len = metadata.len();
            return Ok(Attr { metadata, logical_size: len });
        }

        let state = self.registry.acquire(&path, true).await;
        let mut inner = state.inner.lock().await;
        if inner.nlink <= 1 && metadata.nlink() > 1 {
            inner.nlink = metadata.nlink() as u32;
            inner.dontcompress = true;
        }
        if inner.size == FileSize::Invalid {
            if metadata.len() >= HEADER_LEN {
                match Header::read_from_path(&path).map_err(FsError::from) {
                    Ok(Some(header)) => {
                        inner.codec = Some(header.codec);
                        inner.size = FileSize::Known(header.size);
                    }
                    Ok(None) => {
                        inner.codec = None;
                        inner.size = FileSize::Known(metadata.len());
                    }
                    Err(err) => {
                        drop(inner);
                        self.registry.release(&state, &self.queue, &self.policy).await;
                        return Err(err);
                    }
                }
            } else {
                inner.codec = None;
                inner.size = FileSize::Known(metadata.len());
            }
        }
        let logical_size = inner.size.get().unwrap_or_else(|| metadata.len());
        drop(inner);
        self.registry.release(&state, &self.queue, &self.policy).await;
        Ok(Attr { metadata, logical_size })
    }

    /// Directory listing with the hidden-name filters applied: our own
    /// `._.tmp` prefix and the dispatcher's `.fuse_hidden` temp files never
    /// appear to clients.
    pub async fn read_dir(&self, relative: &Path) -> FsResult<Vec<(String, std::fs::FileType)>> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(&path).map_err(FsError::from)? {
                let entry = entry.map_err(FsError::from)?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.contains("._.tmp") || name.contains(".fuse_hidden") {
                    continue;
                }
                let file_type = entry.file_type().map_err(FsError::from)?;
                entries.push((name, file_type));
            }
            Ok(entries)
        })
        .await
        .expect("readdir task panicked")
    }

    /// The backing rename happens first,
    /// then the record's identity is transferred to the destination slot
    /// under the registry's path-ordered locking discipline.
    pub async fn rename(&self, from: &Path, to: &Path) -> FsResult<()> {
        let src_path = self.backing_path(from);
        let dst_path = self.backing_path(to);
        let state = self.registry.acquire(&src_path, true).await;

        if let Err(err) = std::fs::rename(&src_path, &dst_path) {
            self.registry.release(&state, &self.queue, &self.policy).await;
            return Err(FsError::from(err));
        }

        self.registry.rename(state.clone(), &dst_path).await;
        self.registry.release(&state, &self.queue, &self.policy).await;
        Ok(())
    }

    /// The record is tombstoned only
    /// after the backing removal succeeds, so a failed unlink never orphans
    /// live descriptors.
    pub async fn unlink(&self, relative: &Path) -> FsResult<()> {
        let path = self.backing_path(relative);
        let state = self.registry.acquire(&path, true).await;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.registry.mark_deleted(&state).await;
                Ok(())
            }
            Err(err) => {
                self.registry.release(&state, &self.queue, &self.policy).await;
                Err(FsError::from(err))
            }
        }
    }

    /// A compressed source
    /// is decompressed in place first so both names see raw bytes, then
    /// `dontcompress` sticks (even if the link syscall itself then fails,
    /// matching the original's ordering).
    pub async fn link(&self, from: &Path, to: &Path) -> FsResult<()> {
        let src_path = self.backing_path(from);
        let dst_path = self.backing_path(to);
        let state = self.registry.acquire(&src_path, true).await;
        let mut inner = state.inner.lock().await;

        if let Some(codec_id) = inner.codec {
            if let Err(err) = self.decompress_in_place(&mut inner, codec_id).await {
                drop(inner);
                self.registry.release(&state, &self.queue, &self.policy).await;
                return Err(err);
            }
        }
        inner.dontcompress = true;
        drop(inner);

        let result = std::fs::hard_link(&src_path, &dst_path).map_err(FsError::from);
        self.registry.release(&state, &self.queue, &self.policy).await;
        result
    }

    /// Device/fifo/socket nodes, and plain regular files created without
    /// an immediate open, both go through
    /// the single `mknod(2)` syscall the original relies on.
    pub async fn mknod(&self, relative: &Path, mode: u32, rdev: u32) -> FsResult<()> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || raw_mknod(&path, mode, rdev)).await.expect("mknod task panicked")
    }

    pub async fn mkdir(&self, relative: &Path, mode: u32) -> FsResult<()> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir(&path).map_err(FsError::from)?;
            set_mode(&path, mode)
        })
        .await
        .expect("mkdir task panicked")
    }

    pub async fn rmdir(&self, relative: &Path) -> FsResult<()> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || std::fs::remove_dir(&path).map_err(FsError::from))
            .await
            .expect("rmdir task panicked")
    }

    pub async fn symlink(&self, target: &Path, link: &Path) -> FsResult<()> {
        let link_path = self.backing_path(link);
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || std::os::unix::fs::symlink(&target, &link_path).map_err(FsError::from))
            .await
            .expect("symlink task panicked")
    }

    pub async fn read_link(&self, relative: &Path) -> FsResult<std::path::PathBuf> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || std::fs::read_link(&path).map_err(FsError::from))
            .await
            .expect("readlink task panicked")
    }

    pub async fn chmod(&self, relative: &Path, mode: u32) -> FsResult<()> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || set_mode(&path, mode))
            .await
            .expect("chmod task panicked")
    }

    pub async fn chown(&self, relative: &Path, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || std::os::unix::fs::lchown(&path, uid, gid).map_err(FsError::from))
            .await
            .expect("chown task panicked")
    }

    /// A plain passthrough to the backing filesystem's own statistics.
    pub async fn statfs(&self, relative: &Path) -> FsResult<libc::statfs> {
        let path = self.backing_path(relative);
        tokio::task::spawn_blocking(move || raw_statfs(&path)).await.expect("statfs task panicked")
    }
}

fn set_mode(path: &Path, mode: u32) -> FsResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(FsError::from)
}

fn raw_mknod(path: &Path, mode: u32, rdev: u32) -> FsResult<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| FsError::Invalid)?;
    let ret = unsafe { libc::mknod(c_path.as_ptr(), mode, rdev as libc::dev_t) };
    if ret == 0 {
        Ok(())
    } else {
        Err(FsError::from(std::io::Error::last_os_error()))
    }
}

fn raw_statfs(path: &Path) -> FsResult<libc::statfs> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| FsError::Invalid)?;
    unsafe {
        let mut stat: libc::statfs = std::mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut stat) == 0 {
            Ok(stat)
        } else {
            Err(FsError::from(std::io::Error::last_os_error()))
        }
    }
}
