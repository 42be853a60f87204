//! Heuristics deciding which files
//! are worth compressing at all, and how large a quiescent file must be
//! before the background worker bothers with it.

use std::path::Path;

const DEFAULT_INCOMPRESSIBLE_SUFFIXES: &[&str] = &[
    "mp3", "ogg", "avi", "mov", "mpg", "mp4", "mkv", "asf", "gz", "bz2", "zip", "tgz", "lzo",
    "lzma", "rar", "ace", "7z", "jpg", "png", "tiff", "gif", "rpm", "deb",
];

const MMAP_SENSITIVE_DIRS: &[&str] = &["bin", "sbin", "usr/bin", "usr/sbin"];

#[derive(Debug, Clone)]
pub struct Policy {
    pub mmap_protection: bool,
    pub incompressible_suffixes: Vec<String>,
    /// Overrides the filesystem-magic-based default when set (the config
    /// file's `min_filesize_background`).
    pub min_filesize_background: Option<u64>,
}

impl Policy {
    pub fn new(mmap_protection: bool, incompressible_suffixes: Vec<String>, min_filesize_background: Option<u64>) -> Self {
        Self {
            mmap_protection,
            incompressible_suffixes,
            min_filesize_background,
        }
    }

    pub fn default_suffixes() -> Vec<String> {
        DEFAULT_INCOMPRESSIBLE_SUFFIXES.iter().map(|s| s.to_string()).collect()
    }

    fn has_incompressible_suffix(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.incompressible_suffixes.iter().any(|s| s.eq_ignore_ascii_case(ext))
    }

    fn is_mmap_sensitive(&self, path: &Path) -> bool {
        self.mmap_protection && MMAP_SENSITIVE_DIRS.iter().any(|dir| path.starts_with(dir))
    }

    /// Whether a file newly selected for codec binding should compress at
    /// all; hard-link and sticky-`dontcompress` state is tracked in the
    /// file-state record itself and passed in here rather than recomputed.
    pub fn is_compressible(&self, path: &Path, hard_linked: bool, dontcompress: bool) -> bool {
        !hard_linked && !dontcompress && !self.has_incompressible_suffix(path) && !self.is_mmap_sensitive(path)
    }

    /// Minimum size a quiescent file must reach before the background
    /// worker compresses it: zero on filesystems that inline small files
    /// efficiently, one block otherwise.
    pub fn min_background_size(&self, backing_root: &Path) -> u64 {
        if let Some(min) = self.min_filesize_background {
            return min;
        }
        if inlines_small_files(backing_root) {
            0
        } else {
            block_size(backing_root)
        }
    }
}

#[cfg(target_os = "linux")]
fn inlines_small_files(root: &Path) -> bool {
    const REISERFS_SUPER_MAGIC: i64 = 0x5265_4973;
    match statfs(root) {
        Ok(stat) => stat.f_type as i64 == REISERFS_SUPER_MAGIC,
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn inlines_small_files(_root: &Path) -> bool {
    false
}

#[cfg(target_os = "linux")]
fn block_size(root: &Path) -> u64 {
    statfs(root).map(|stat| stat.f_bsize as u64).unwrap_or(4096)
}

#[cfg(not(target_os = "linux"))]
fn block_size(_root: &Path) -> u64 {
    4096
}

#[cfg(target_os = "linux")]
fn statfs(path: &Path) -> std::io::Result<libc::statfs> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())?;
    unsafe {
        let mut stat: libc::statfs = std::mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut stat) == 0 {
            Ok(stat)
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn policy() -> Policy {
        Policy::new(true, Policy::default_suffixes(), None)
    }

    #[test]
    fn rejects_known_media_suffixes() {
        let p = policy();
        assert!(!p.is_compressible(&PathBuf::from("song.mp3"), false, false));
        assert!(p.is_compressible(&PathBuf::from("notes.txt"), false, false));
    }

    #[test]
    fn rejects_mmap_sensitive_dirs() {
        let p = policy();
        assert!(!p.is_compressible(&PathBuf::from("bin/ls"), false, false));
        assert!(!p.is_compressible(&PathBuf::from("usr/sbin/daemon"), false, false));
    }

    #[test]
    fn rejects_hard_linked_and_sticky() {
        let p = policy();
        assert!(!p.is_compressible(&PathBuf::from("a"), true, false));
        assert!(!p.is_compressible(&PathBuf::from("a"), false, true));
    }
}
