//! LZO codec, backed by the `rust-lzo` crate (`-c lzo`).
//!
//! LZO has no native streaming container (unlike gzip/bzip2/xz), so this
//! codec frames compressed output itself: a sequence of
//! `(uncompressed_len: u32 LE, compressed_len: u32 LE, bytes)` blocks, the
//! same shape `lzop` uses on top of the bare LZO1X algorithm.

use std::fs::File;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{CancelCookie, Codec, CodecId, StreamReader, StreamWriter};

const BLOCK_SIZE: usize = 256 * 1024;

pub struct LzoCodec;

impl Codec for LzoCodec {
    fn id(&self) -> CodecId {
        CodecId::Lzo
    }

    fn compress(&self, cancel: &CancelCookie, src: &File, dst: &File) -> io::Result<u64> {
        let mut reader = src;
        let mut writer = LzoWriter(dst.try_clone()?);
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut total = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "compression cancelled"));
            }
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n])?;
            total += n as u64;
        }
        writer.finish()?;
        Ok(total)
    }

    fn decompress(&self, src: &File, dst: &File) -> io::Result<u64> {
        let mut reader = LzoReader::new(src.try_clone()?);
        let mut dst = dst;
        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    fn open_writer(&self, fd: File) -> io::Result<Box<dyn StreamWriter>> {
        Ok(Box::new(LzoWriter(fd)))
    }

    fn open_reader(&self, fd: File) -> io::Result<Box<dyn StreamReader>> {
        Ok(Box::new(LzoReader::new(fd)))
    }
}

struct LzoWriter(File);

impl StreamWriter for LzoWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        for chunk in buf.chunks(BLOCK_SIZE) {
            let compressed = lzo::compress(chunk);
            self.0.write_u32::<LittleEndian>(chunk.len() as u32)?;
            self.0.write_u32::<LittleEndian>(compressed.len() as u32)?;
            self.0.write_all(&compressed)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

struct LzoReader {
    fd: File,
    block: Vec<u8>,
    pos: usize,
}

impl LzoReader {
    fn new(fd: File) -> Self {
        Self { fd, block: Vec::new(), pos: 0 }
    }

    fn fill_block(&mut self) -> io::Result<bool> {
        let uncompressed_len = match self.fd.read_u32::<LittleEndian>() {
            Ok(v) => v as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        };
        let compressed_len = self.fd.read_u32::<LittleEndian>()? as usize;
        let mut compressed = vec![0u8; compressed_len];
        self.fd.read_exact(&mut compressed)?;
        self.block = lzo::decompress(&compressed, uncompressed_len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "corrupt lzo block"))?;
        self.pos = 0;
        Ok(true)
    }
}

impl StreamReader for LzoReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.block.len() && !self.fill_block()? {
            return Ok(0);
        }
        let n = (buf.len()).min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
