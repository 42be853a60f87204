//! Header Codec: the fixed on-disk prefix marking a backing file as
//! compressed.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::CodecId;

pub const MAGIC: [u8; 3] = [0x1F, 0x5D, 0x89];
/// 3 magic bytes + 1 codec byte + 8-byte little-endian size.
pub const HEADER_LEN: u64 = 3 + 1 + 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub codec: CodecId,
    pub size: u64,
}

impl Header {
    /// Write the header at offset 0, in magic/codec/size order, leaving the
    /// descriptor positioned just past it.
    pub fn write(file: &File, header: Header) -> io::Result<()> {
        let mut file = file;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&MAGIC)?;
        file.write_u8(header.codec as u8)?;
        file.write_u64::<LittleEndian>(header.size)?;
        Ok(())
    }

    /// Read the header from the descriptor's current position. On success
    /// the descriptor is left positioned at the start of the compressed
    /// stream. Files shorter than the header are never parsed and yield
    /// `Ok(None)` without touching the descriptor's position guarantee.
    pub fn read_from_file(file: &File) -> io::Result<Option<Header>> {
        let mut file = file;
        let start = file.stream_position()?;
        if file.metadata()?.len().saturating_sub(start) < HEADER_LEN {
            return Ok(None);
        }
        let mut magic = [0u8; 3];
        file.read_exact(&mut magic)?;
        if magic != MAGIC {
            file.seek(SeekFrom::Start(start))?;
            return Ok(None);
        }
        let codec_byte = file.read_u8()?;
        let codec = match CodecId::from_byte(codec_byte) {
            Some(codec) => codec,
            None => {
                file.seek(SeekFrom::Start(start))?;
                return Err(io::Error::new(io::ErrorKind::InvalidData, "unknown codec id in header"));
            }
        };
        let size = file.read_u64::<LittleEndian>()?;
        Ok(Some(Header { codec, size }))
    }

    /// Read the header by opening `path` fresh for read.
    pub fn read_from_path(path: &Path) -> io::Result<Option<Header>> {
        let file = File::open(path)?;
        Self::read_from_file(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_header() {
        let tmp = NamedTempFile::new().unwrap();
        let file = OpenOptions::new().read(true).write(true).open(tmp.path()).unwrap();
        Header::write(&file, Header { codec: CodecId::Gzip, size: 1234 }).unwrap();
        file.sync_all().unwrap();

        let read_back = OpenOptions::new().read(true).open(tmp.path()).unwrap();
        let header = Header::read_from_file(&read_back).unwrap().unwrap();
        assert_eq!(header.codec, CodecId::Gzip);
        assert_eq!(header.size, 1234);
    }

    #[test]
    fn short_file_is_not_a_header() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"hi").unwrap();
        let file = File::open(tmp.path()).unwrap();
        assert!(Header::read_from_file(&file).unwrap().is_none());
    }
}
