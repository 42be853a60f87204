use std::path::PathBuf;
use std::sync::Arc;

use compressfs::codec::CodecId;
use compressfs::engine::Engine;
use compressfs::policy::Policy;
use tempfile::TempDir;

/// Direct-`Engine`-over-`TempDir` fixture, no FUSE mount required.
pub struct Fixture {
    pub tempdir: TempDir,
    pub engine: Arc<Engine>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_codec(CodecId::Gzip)
    }

    pub fn with_codec(codec: CodecId) -> Self {
        let tempdir = TempDir::new().expect("create temp dir");
        // `min_filesize_background: Some(0)` makes background eligibility
        // independent of the host filesystem's block size or type.
        let policy = Policy::new(true, Policy::default_suffixes(), Some(0));
        let engine = Engine::new(tempdir.path().to_path_buf(), codec, 6, policy);
        Self { tempdir, engine }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.tempdir.path().join(name)
    }

    pub fn write_file(&self, name: &str, data: &[u8]) {
        std::fs::write(self.path(name), data).expect("write fixture file");
    }
}
