//! LZMA/xz codec, backed by the `xz2` crate (`-c lzma`).

use std::fs::File;
use std::io::{self, Read, Write};

use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use super::{CancelCookie, Codec, CodecId, StreamReader, StreamWriter};

pub struct LzmaCodec {
    level: u32,
}

impl LzmaCodec {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Codec for LzmaCodec {
    fn id(&self) -> CodecId {
        CodecId::Lzma
    }

    fn compress(&self, cancel: &CancelCookie, src: &File, dst: &File) -> io::Result<u64> {
        let mut reader = src;
        let mut encoder = XzEncoder::new(dst, self.level);
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
        let mut decoder = XzDecoder::new(src);
        let mut dst = dst;
        io::copy(&mut decoder, &mut dst)
    }

    fn open_writer(&self, fd: File) -> io::Result<Box<dyn StreamWriter>> {
        Ok(Box::new(LzmaWriter(Some(XzEncoder::new(fd, self.level)))))
    }

    fn open_reader(&self, fd: File) -> io::Result<Box<dyn StreamReader>> {
        Ok(Box::new(LzmaReader(XzDecoder::new(fd))))
    }
}

struct LzmaWriter(Option<XzEncoder<File>>);

impl StreamWriter for LzmaWriter {
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

struct LzmaReader(XzDecoder<File>);

impl StreamReader for LzmaReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}
