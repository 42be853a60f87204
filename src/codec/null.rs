//! The "null" codec: stores bytes verbatim. Used when compression is
//! disabled, ignored by `-l`, and selectable via `-c null`.

use std::fs::File;
use std::io::{self, Read, Write};

use super::{CancelCookie, Codec, CodecId, StreamReader, StreamWriter};

pub struct NullCodec;

impl Codec for NullCodec {
    fn id(&self) -> CodecId {
        CodecId::Null
    }

    fn compress(&self, cancel: &CancelCookie, src: &File, dst: &File) -> io::Result<u64> {
        copy_with_cancel(cancel, src, dst)
    }

    fn decompress(&self, src: &File, dst: &File) -> io::Result<u64> {
        copy_with_cancel(&CancelCookie::new(), src, dst)
    }

    fn open_writer(&self, fd: File) -> io::Result<Box<dyn StreamWriter>> {
        Ok(Box::new(NullWriter(fd)))
    }

    fn open_reader(&self, fd: File) -> io::Result<Box<dyn StreamReader>> {
        Ok(Box::new(NullReader(fd)))
    }
}

fn copy_with_cancel(cancel: &CancelCookie, src: &File, dst: &File) -> io::Result<u64> {
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    let mut src = src;
    let mut dst = dst;
    loop {
        if cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "compression cancelled"));
        }
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

struct NullWriter(File);

impl StreamWriter for NullWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

struct NullReader(File);

impl StreamReader for NullReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.0, buf)
    }
}
