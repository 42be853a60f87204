//! Codec registry: a small set of stream codecs keyed by a single-byte type
//! identifier.
//!
//! Each codec implementation is a contract-only collaborator — this module
//! only wires real third-party codec crates behind one trait, it does not
//! implement compression algorithms itself.

mod bz2;
mod gzip;
mod lzma;
mod lzo;
mod null;

use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

/// Single-byte codec type identifier, matching the on-disk header byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CodecId {
    Null = 0,
    Bz2 = 1,
    Gzip = 2,
    Lzo = 3,
    Lzma = 4,
}

impl CodecId {
    /// Parse a codec id out of the raw header byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        CodecId::from_u8(byte)
    }

    /// The CLI/config name for this codec.
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Null => "null",
            CodecId::Bz2 => "bz2",
            CodecId::Gzip => "gz",
            CodecId::Lzo => "lzo",
            CodecId::Lzma => "lzma",
        }
    }

    /// Parse a codec id out of its CLI/config name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "null" => Some(CodecId::Null),
            "bz2" => Some(CodecId::Bz2),
            "gz" | "gzip" => Some(CodecId::Gzip),
            "lzo" => Some(CodecId::Lzo),
            "lzma" => Some(CodecId::Lzma),
            _ => None,
        }
    }
}

/// Polled by a codec's [`Codec::compress`] so long operations can abort
/// cooperatively.
#[derive(Debug, Clone, Default)]
pub struct CancelCookie(Arc<AtomicBool>);

impl CancelCookie {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A stream compression codec: whole-file compress/decompress plus
/// streaming append/read handles for the direct I/O engine.
///
/// Compress/decompress operate on whole files (fd-to-fd) and are used by
/// the background compressor, truncate-time decompression, and the offline
/// tool. `open_writer`/`open_reader` back the foreground streaming path
/// (sequential append, rewrite-and-reopen on random read).
pub trait Codec: Send + Sync {
    fn id(&self) -> CodecId;

    /// Compress the whole contents of `src` into `dst`, starting at each
    /// file's current position. Returns the uncompressed byte count.
    /// Polls `cancel` at least once per block; on cancellation, returns
    /// `Err` with `ErrorKind::Interrupted` and leaves `dst` in an undefined
    /// (but never read) state — callers always discard the destination on
    /// error.
    fn compress(&self, cancel: &CancelCookie, src: &File, dst: &File) -> io::Result<u64>;

    /// Decompress the whole contents of `src` into `dst`, starting at each
    /// file's current position. Returns the uncompressed byte count.
    fn decompress(&self, src: &File, dst: &File) -> io::Result<u64>;

    /// Open a streaming writer appending compressed output for `fd`,
    /// starting at the fd's current position (just past the header).
    fn open_writer(&self, fd: File) -> io::Result<Box<dyn StreamWriter>>;

    /// Open a streaming reader decompressing from `fd`, starting at the
    /// fd's current position (just past the header).
    fn open_reader(&self, fd: File) -> io::Result<Box<dyn StreamReader>>;
}

/// Streaming decompression handle bound to one open descriptor.
pub trait StreamReader: Send {
    /// Read up to `buf.len()` decompressed bytes, advancing the stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Streaming compression handle bound to one open descriptor.
pub trait StreamWriter: Send {
    /// Append `buf` to the compressed stream.
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Flush and finalize the stream so the backing file is a valid,
    /// independently decompressible blob.
    fn finish(&mut self) -> io::Result<()>;
}

/// Process-wide table of available codecs, keyed by [`CodecId`].
///
/// Constructed once by the engine and passed around, never ambient.
pub struct CodecRegistry {
    codecs: [Arc<dyn Codec>; 5],
}

impl CodecRegistry {
    /// Build the registry with the standard five codecs.
    pub fn new(level: u32) -> Self {
        Self {
            codecs: [
                Arc::new(null::NullCodec),
                Arc::new(bz2::Bz2Codec::new(level)),
                Arc::new(gzip::GzipCodec::new(level)),
                Arc::new(lzo::LzoCodec),
                Arc::new(lzma::LzmaCodec::new(level)),
            ],
        }
    }

    pub fn get(&self, id: CodecId) -> Arc<dyn Codec> {
        self.codecs[id as usize].clone()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Codec>> {
        CodecId::from_name(name).map(|id| self.get(id))
    }
}
