//! Bzip2 codec, backed by the `bzip2` crate (`-c bz2`).

use std::fs::File;
use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;

use super::{CancelCookie, Codec, CodecId, StreamReader, StreamWriter};

pub struct Bz2Codec {
    level: Compression,
}

impl Bz2Codec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.clamp(1, 9)),
        }
    }
}

impl Codec for Bz2Codec {
    fn id(&self) -> CodecId {
        CodecId::Bz2
    }

    fn compress(&self, cancel: &CancelCookie, src: &File, dst: &File) -> io::Result<u64> {
        let mut reader = src;
        let mut encoder = BzEncoder::new(dst, self.level);
        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "compression cancelled"));
            }
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            encoder.write_all(&buf[..n])?;
            total += n as u64;
        }
        encoder.finish()?;
        Ok(total)
    }

    fn decompress(&self, src: &File, dst: &File) -> io::Result<u64> {
        let mut decoder = BzDecoder::new(src);
        let mut dst = dst;
        io::copy(&mut decoder, &mut dst)
    }

    fn open_writer(&self, fd: File) -> io::Result<Box<dyn StreamWriter>> {
        Ok(Box::new(Bz2Writer(Some(BzEncoder::new(fd, self.level)))))
    }

    fn open_reader(&self, fd: File) -> io::Result<Box<dyn StreamReader>> {
        Ok(Box::new(Bz2Reader(BzDecoder::new(fd))))
    }
}

struct Bz2Writer(Option<BzEncoder<File>>);

impl StreamWriter for Bz2Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.as_mut().expect("write after finish").write_all(buf)
    }

    fn finish(&mut self) -> io::Result<()> {
        if let Some(mut encoder) = self.0.take() {
            encoder.try_finish()?;
        }
        Ok(())
    }
}

struct Bz2Reader(BzDecoder<File>);

impl StreamReader for Bz2Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}
