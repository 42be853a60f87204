//! The `fuser::Filesystem` implementation. This is the only module that
//! mentions `fuser` types — everything else is reachable and testable
//! without a kernel mount.
//!
//! `fuser`'s callbacks are synchronous; the engine underneath is async.
//! Each callback bridges the two with `Handle::block_on`, the one
//! deliberate seam where this crate is not end-to-end async.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
};
use tracing::{debug, warn};

use crate::engine::ops::Attr;
use crate::engine::Engine;
use crate::error::FsError;
use crate::state::DescriptorId;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Interns backing-relative paths as FUSE inode numbers, since the kernel
/// addresses files by `ino` rather than by path.
struct Inodes {
    next: u64,
    paths: HashMap<u64, PathBuf>,
    index: HashMap<PathBuf, u64>,
}

impl Inodes {
    fn new() -> Self {
        let mut paths = HashMap::new();
        let mut index = HashMap::new();
        paths.insert(ROOT_INO, PathBuf::new());
        index.insert(PathBuf::new(), ROOT_INO);
        Self { next: ROOT_INO + 1, paths, index }
    }

    fn path(&self, ino: u64) -> Option<PathBuf> {
        self.paths.get(&ino).cloned()
    }

    fn ensure(&mut self, path: PathBuf) -> u64 {
        if let Some(&ino) = self.index.get(&path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.clone());
        self.index.insert(path, ino);
        ino
    }

    fn forget(&mut self, path: &Path) {
        if let Some(ino) = self.index.remove(path) {
            self.paths.remove(&ino);
        }
    }

    /// Update the entry for `old` (and every entry beneath it) to reflect a
    /// successful rename.
    fn rename(&mut self, old: &Path, new: PathBuf) {
        let Some(ino) = self.index.remove(old) else {
            return;
        };
        self.paths.insert(ino, new.clone());
        self.index.insert(new.clone(), ino);

        let updates: Vec<(u64, PathBuf)> = self
            .paths
            .iter()
            .filter_map(|(&child_ino, child_path)| {
                if child_ino == ino {
                    return None;
                }
                let suffix = child_path.strip_prefix(old).ok()?;
                if suffix.as_os_str().is_empty() {
                    return None;
                }
                Some((child_ino, new.join(suffix)))
            })
            .collect();

        for (child_ino, updated) in updates {
            if let Some(old_path) = self.paths.get(&child_ino).cloned() {
                self.index.remove(&old_path);
                self.paths.insert(child_ino, updated.clone());
                self.index.insert(updated, child_ino);
            }
        }
    }
}

pub struct CompressFs {
    engine: Arc<Engine>,
    handle: tokio::runtime::Handle,
    inodes: Mutex<Inodes>,
}

impl CompressFs {
    /// Must be constructed from within a live tokio runtime: `block_on`
    /// bridges every callback back onto that runtime's executor.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, handle: tokio::runtime::Handle::current(), inodes: Mutex::new(Inodes::new()) }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }

    fn path_for(&self, ino: u64) -> Result<PathBuf, c_int> {
        self.inodes.lock().unwrap().path(ino).ok_or(libc::ENOENT)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<PathBuf, c_int> {
        let mut path = self.path_for(parent)?;
        path.push(name);
        Ok(path)
    }

    fn ensure_ino(&self, path: PathBuf) -> u64 {
        self.inodes.lock().unwrap().ensure(path)
    }

    fn reply_entry_for(&self, path: &Path, reply: ReplyEntry) {
        match self.block_on(self.engine.getattr(path)) {
            Ok(attr) => {
                let ino = self.ensure_ino(path.to_path_buf());
                reply.entry(&TTL, &build_attr(ino, &attr), 0);
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }
}

impl Filesystem for CompressFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        debug!("filesystem mounted");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!("filesystem unmounting");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        self.reply_entry_for(&path, reply);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        match self.block_on(self.engine.getattr(&path)) {
            Ok(attr) => reply.attr(&TTL, &build_attr(ino, &attr)),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };

        let result: Result<(), FsError> = (|| {
            self.block_on(async {
                if let Some(size) = size {
                    self.engine.set_size(&path, size).await?;
                }
                if let Some(mode) = mode {
                    self.engine.chmod(&path, mode).await?;
                }
                if uid.is_some() || gid.is_some() {
                    self.engine.chown(&path, uid, gid).await?;
                }
                Ok(())
            })
        })();

        match result {
            Ok(()) => match self.block_on(self.engine.getattr(&path)) {
                Ok(attr) => reply.attr(&TTL, &build_attr(ino, &attr)),
                Err(err) => reply.error(err.to_errno()),
            },
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        match self.block_on(self.engine.read_link(&path)) {
            Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        if let Err(err) = self.block_on(self.engine.mknod(&path, mode, rdev)) {
            return reply.error(err.to_errno());
        }
        self.reply_entry_for(&path, reply);
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        if let Err(err) = self.block_on(self.engine.mkdir(&path, mode)) {
            return reply.error(err.to_errno());
        }
        self.reply_entry_for(&path, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        match self.block_on(self.engine.unlink(&path)) {
            Ok(()) => {
                self.inodes.lock().unwrap().forget(&path);
                reply.ok();
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        match self.block_on(self.engine.rmdir(&path)) {
            Ok(()) => {
                self.inodes.lock().unwrap().forget(&path);
                reply.ok();
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn symlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, target: &Path, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        if let Err(err) = self.block_on(self.engine.symlink(target, &path)) {
            return reply.error(err.to_errno());
        }
        self.reply_entry_for(&path, reply);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        let to = match self.child_path(newparent, newname) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        match self.block_on(self.engine.rename(&from, &to)) {
            Ok(()) => {
                self.inodes.lock().unwrap().rename(&from, to);
                reply.ok();
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn link(&mut self, _req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        let from = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        let to = match self.child_path(newparent, newname) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        if let Err(err) = self.block_on(self.engine.link(&from, &to)) {
            return reply.error(err.to_errno());
        }
        self.reply_entry_for(&to, reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        let readable = flags & libc::O_ACCMODE != libc::O_WRONLY;
        let writable = flags & (libc::O_WRONLY | libc::O_RDWR) != 0;
        match self.block_on(self.engine.open(&path, false, readable, writable)) {
            Ok(id) => reply.opened(id.0, 0),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        let readable = flags & libc::O_ACCMODE != libc::O_WRONLY;
        let writable = flags & (libc::O_WRONLY | libc::O_RDWR) != 0;
        let id = match self.block_on(self.engine.open(&path, true, readable, writable)) {
            Ok(id) => id,
            Err(err) => return reply.error(err.to_errno()),
        };
        if let Err(err) = self.block_on(self.engine.chmod(&path, mode)) {
            warn!(?err, path = %path.display(), "failed to apply mode on create");
        }
        match self.block_on(self.engine.getattr(&path)) {
            Ok(attr) => {
                let ino = self.ensure_ino(path);
                reply.created(&TTL, &build_attr(ino, &attr), 0, id.0, 0);
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.block_on(self.engine.read(DescriptorId(fh), offset as u64, size as usize)) {
            Ok(data) => reply.data(&data),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.block_on(self.engine.write(DescriptorId(fh), offset as u64, data)) {
            Ok(written) => reply.written(written),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok()
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        if let Err(err) = self.block_on(self.engine.release(DescriptorId(fh))) {
            warn!(?err, "release failed");
        }
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.block_on(self.engine.fsync(DescriptorId(fh))) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        let parent_ino = path.parent().map(|p| self.ensure_ino(p.to_path_buf())).unwrap_or(ROOT_INO);

        match self.block_on(self.engine.read_dir(&path)) {
            Ok(children) => {
                let mut entries = vec![(ino, FileType::Directory, ".".to_string()), (parent_ino, FileType::Directory, "..".to_string())];
                for (name, file_type) in children {
                    let child_ino = self.ensure_ino(path.join(&name));
                    entries.push((child_ino, to_fuser_file_type(file_type), name));
                }
                for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
                    if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(err) => reply.error(err.to_errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = match self.path_for(ino) {
            Ok(p) => p,
            Err(errno) => return reply.error(errno),
        };
        match self.block_on(self.engine.statfs(&path)) {
            Ok(stat) => reply.statfs(
                stat.f_blocks as u64,
                stat.f_bfree as u64,
                stat.f_bavail as u64,
                stat.f_files as u64,
                stat.f_ffree as u64,
                stat.f_bsize as u32,
                255,
                stat.f_frsize as u32,
            ),
            Err(err) => reply.error(err.to_errno()),
        }
    }
}

fn to_fuser_file_type(ft: std::fs::FileType) -> FileType {
    use std::os::unix::fs::FileTypeExt;
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

fn build_attr(ino: u64, attr: &Attr) -> FileAttr {
    let meta = &attr.metadata;
    let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
    let atime = meta.accessed().unwrap_or(UNIX_EPOCH);
    FileAttr {
        ino,
        size: attr.logical_size,
        blocks: meta.blocks(),
        atime,
        mtime,
        // Matches the original's getattr: ctime is forced to mtime because
        // there is no syscall to set it directly, and `tar` checks it.
        ctime: mtime,
        crtime: mtime,
        kind: to_fuser_file_type(meta.file_type()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}
