//! Gzip codec, backed by `flate2` (`-c gz`).

use std::fs::File;
use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{CancelCookie, Codec, CodecId, StreamReader, StreamWriter};

pub struct GzipCodec {
    level: Compression,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Codec for GzipCodec {
    fn id(&self) -> CodecId {
        CodecId::Gzip
    }

    fn compress(&self, cancel: &CancelCookie, src: &File, dst: &File) -> io::Result<u64> {
        let mut reader = src;
        let mut encoder = GzEncoder::new(dst, self.level);
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
        let mut decoder = GzDecoder::new(src);
        let mut dst = dst;
        io::copy(&mut decoder, &mut dst)
    }

    fn open_writer(&self, fd: File) -> io::Result<Box<dyn StreamWriter>> {
        Ok(Box::new(GzipWriter(Some(GzEncoder::new(fd, self.level)))))
    }

    fn open_reader(&self, fd: File) -> io::Result<Box<dyn StreamReader>> {
        Ok(Box::new(GzipReader(GzDecoder::new(fd))))
    }
}

struct GzipWriter(Option<GzEncoder<File>>);

impl StreamWriter for GzipWriter {
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

struct GzipReader(GzDecoder<File>);

impl StreamReader for GzipReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}
