//! Read/write/truncate against either the raw descriptor or a streaming
//! codec handle, including the rewrite-on-non-sequential-write and
//! rollback-to-raw policies, plus the full-file compress/decompress cycle
//! shared with the background worker and hard-link handling.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::codec::{CancelCookie, CodecId};
use crate::descriptor::{CodecStream, Descriptor, DescriptorFlags};
use crate::error::{FsError, FsResult};
use crate::header::{Header, HEADER_LEN};
use crate::state::{DescriptorId, FileSize, FileState, FileStateInner};

use super::Engine;

const SIZE_FIELD_OFFSET: u64 = 4;
const STREAM_CHUNK: usize = 64 * 1024;

impl Engine {
    /// Open (optionally creating) the backing file at `path` and return a
    /// fresh descriptor bound to its file-state record.
    pub async fn open(&self, relative: &Path, create: bool, readable: bool, writable: bool) -> FsResult<DescriptorId> {
        let path = self.backing_path(relative);
        let state = self.registry.acquire(&path, true).await;

        // Write-only opens are upgraded to read-write: the header must be
        // readable even for writers. Plain read-only opens are left alone,
        // so a caller without write permission on the backing file can
        // still open it for reading.
        let effective_write = writable || !readable;
        let flags = DescriptorFlags {
            readable: true,
            writable: effective_write,
        };

        let open_result = OpenOptions::new()
            .read(true)
            .write(effective_write)
            .create(create)
            .open(&path);
        let file = match open_result {
            Ok(file) => file,
            Err(err) => {
                self.registry.release(&state, &self.queue, &self.policy).await;
                return Err(FsError::from(err));
            }
        };

        if let Err(err) = self.refresh_metadata(&state, &file).await {
            self.registry.release(&state, &self.queue, &self.policy).await;
            return Err(err);
        }

        let id = self.next_descriptor_id();
        let descriptor = Descriptor::new(id, state.clone(), file, flags);
        self.descriptors.lock().await.insert(id, descriptor);
        {
            let mut inner = state.inner.lock().await;
            inner.descriptors.push(id);
        }
        trace!(path = %path.display(), ?id, "opened descriptor");
        Ok(id)
    }

    /// Close a descriptor: finish any in-flight codec stream, detach it
    /// from its file-state record, and release the record.
    pub async fn release(&self, id: DescriptorId) -> FsResult<()> {
        let mut table = self.descriptors.lock().await;
        let Some(mut descriptor) = table.remove(&id) else {
            return Ok(());
        };
        let state = descriptor.state.clone();
        drop(table);

        if let Some(CodecStream::Writer(writer)) = &mut descriptor.stream {
            writer.finish().map_err(FsError::from)?;
        }

        {
            let mut inner = state.inner.lock().await;
            inner.descriptors.retain(|d| *d != id);
        }
        self.registry.release(&state, &self.queue, &self.policy).await;
        Ok(())
    }

    /// Flush a descriptor's raw fd to disk. Codec streams are buffered
    /// entirely in the kernel page cache of the backing fd, so syncing the
    /// fd is sufficient without flushing the stream itself.
    pub async fn fsync(&self, id: DescriptorId) -> FsResult<()> {
        let file = {
            let table = self.descriptors.lock().await;
            table.get(&id).ok_or(FsError::Invalid)?.file.try_clone().map_err(FsError::from)?
        };
        tokio::task::spawn_blocking(move || file.sync_all().map_err(FsError::from)).await.expect("fsync task panicked")
    }

    /// Stat the just-opened backing file, detect hard links (sticky
    /// `dontcompress`), and classify it as raw or compressed by attempting
    /// to parse the header.
    async fn refresh_metadata(&self, state: &Arc<FileState>, file: &std::fs::File) -> FsResult<()> {
        let metadata = file.metadata().map_err(FsError::from)?;
        let mut inner = state.inner.lock().await;
        inner.inode = metadata.ino();
        inner.nlink = metadata.nlink() as u32;
        if inner.nlink > 1 {
            inner.dontcompress = true;
        }

        if metadata.len() < HEADER_LEN {
            inner.codec = None;
            inner.size = FileSize::Known(metadata.len());
            return Ok(());
        }

        file.seek_to_start()?;
        match Header::read_from_file(file).map_err(FsError::from)? {
            Some(header) => {
                inner.codec = Some(header.codec);
                inner.size = FileSize::Known(header.size);
            }
            None => {
                inner.codec = None;
                inner.size = FileSize::Known(metadata.len());
            }
        }
        Ok(())
    }

    /// Raw positional read, or advance/open the
    /// streaming decoder and read through it.
    pub async fn read(&self, id: DescriptorId, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let state = self.descriptor_state(id).await?;
        let mut inner = state.inner.lock().await;

        let Some(codec_id) = inner.codec else {
            let file = {
                let table = self.descriptors.lock().await;
                table.get(&id).ok_or(FsError::Invalid)?.file.try_clone().map_err(FsError::from)?
            };
            drop(inner);
            return positional_read(&file, offset, size).await;
        };

        let result = self.read_compressed(&mut inner, id, codec_id, offset, size).await;
        if result.is_err() {
            inner.size = FileSize::Invalid;
        }
        result
    }

    async fn read_compressed(
        &self,
        inner: &mut FileStateInner,
        id: DescriptorId,
        codec_id: CodecId,
        offset: u64,
        size: usize,
    ) -> FsResult<Vec<u8>> {
        let mut table = self.descriptors.lock().await;
        let descriptor = table.get_mut(&id).ok_or(FsError::Invalid)?;

        if descriptor.stream.is_none() || offset < descriptor.offset {
            reopen_stream_reader(&self.codecs, codec_id, descriptor)?;
        }

        let mut skipped = 0u64;
        while descriptor.offset < offset {
            let want = ((offset - descriptor.offset) as usize).min(STREAM_CHUNK);
            let mut discard = vec![0u8; want];
            let n = read_from_stream(descriptor, &mut discard)?;
            if n == 0 {
                break;
            }
            descriptor.offset += n as u64;
            skipped += n as u64;
        }
        inner.skipped += skipped;

        let mut buf = vec![0u8; size];
        let mut total = 0;
        while total < size {
            let n = read_from_stream(descriptor, &mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
            descriptor.offset += n as u64;
        }
        buf.truncate(total);
        Ok(buf)
    }

    /// Binds a codec on the first write to a
    /// fresh file, appends sequentially through the stream, or rolls back
    /// to raw storage on a non-sequential write.
    pub async fn write(&self, id: DescriptorId, offset: u64, data: &[u8]) -> FsResult<u32> {
        let state = self.descriptor_state(id).await?;
        let mut inner = state.inner.lock().await;

        if inner.codec.is_none() {
            self.bind_or_refuse(&mut inner, offset);
        }

        if let Some(codec_id) = inner.codec {
            let stream_end = inner.size.get().unwrap_or(0);
            if offset == stream_end {
                self.append_compressed(&mut inner, id, codec_id, data).await?;
                return Ok(data.len() as u32);
            }
            debug!(path = %inner.path.display(), offset, stream_end, "non-sequential write, rolling back to raw");
            self.rollback_to_raw(&mut inner, id).await?;
        }

        let file = {
            let table = self.descriptors.lock().await;
            table.get(&id).ok_or(FsError::Invalid)?.file.try_clone().map_err(FsError::from)?
        };
        let written = positional_write(&file, offset, data).await?;
        let new_end = offset + written as u64;
        if inner.size.get().map_or(true, |sz| new_end > sz) {
            inner.size = FileSize::Known(new_end);
        }
        Ok(written)
    }

    /// The write-path decision point: bind the default
    /// codec on the very first write to a fresh, zero-size, singly-open
    /// file if policy allows it; otherwise the file is raw forever.
    fn bind_or_refuse(&self, inner: &mut FileStateInner, offset: u64) {
        let decision_point =
            !inner.dontcompress && inner.size == FileSize::Known(0) && inner.accesses == 1 && offset == 0;
        if decision_point && self.policy.is_compressible(&inner.path, inner.nlink > 1, false) {
            inner.codec = Some(self.default_codec);
        } else {
            inner.dontcompress = true;
        }
    }

    async fn append_compressed(
        &self,
        inner: &mut FileStateInner,
        id: DescriptorId,
        codec_id: CodecId,
        data: &[u8],
    ) -> FsResult<()> {
        let mut table = self.descriptors.lock().await;
        let descriptor = table.get_mut(&id).ok_or(FsError::Invalid)?;

        if descriptor.stream.is_none() {
            Header::write(&descriptor.file, Header { codec: codec_id, size: 0 }).map_err(FsError::from)?;
            descriptor.file.seek(SeekFrom::Start(HEADER_LEN)).map_err(FsError::from)?;
            let fd = descriptor.file.try_clone().map_err(FsError::from)?;
            let codec = self.codecs.get(codec_id);
            descriptor.stream = Some(CodecStream::Writer(codec.open_writer(fd).map_err(FsError::from)?));
            descriptor.offset = 0;
        }

        match &mut descriptor.stream {
            Some(CodecStream::Writer(writer)) => writer.write(data).map_err(FsError::from)?,
            _ => return Err(FsError::Invalid),
        }
        descriptor.offset += data.len() as u64;
        let new_size = descriptor.offset;

        // Patch the header's size field in place via a positional write so
        // it never disturbs the stream's own append cursor.
        descriptor
            .file
            .write_at(&new_size.to_le_bytes(), SIZE_FIELD_OFFSET)
            .map_err(FsError::from)?;

        inner.size = FileSize::Known(new_size);
        Ok(())
    }

    /// Decompress the current contents to a temp file, atomically replace
    /// the backing file with it, and reset every open descriptor on this
    /// record to the fresh raw file.
    async fn rollback_to_raw(&self, inner: &mut FileStateInner, id: DescriptorId) -> FsResult<()> {
        let codec_id = inner.codec.take().ok_or(FsError::Invalid)?;
        let path = inner.path.clone();
        let tmp_path = self.temp_path_for(&path);

        // The descriptor table lock is only held long enough to grab a
        // cloned fd; it is never held across the blocking decompress below,
        // so an unrelated file's open()/read()/write() is never stalled by
        // this file's rollback.
        let src = {
            let mut table = self.descriptors.lock().await;
            let descriptor = table.get_mut(&id).ok_or(FsError::Invalid)?;
            if let Some(CodecStream::Writer(writer)) = &mut descriptor.stream {
                writer.finish().map_err(FsError::from)?;
            }
            descriptor.stream = None;
            descriptor.file.try_clone().map_err(FsError::from)?
        };

        let tmp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(FsError::from)?;

        let codec = self.codecs.get(codec_id);
        tokio::task::spawn_blocking(move || {
            src.seek_to(HEADER_LEN)?;
            codec.decompress(&src, &tmp_file)
        })
        .await
        .expect("decompress task panicked")
        .map_err(FsError::from)?;

        std::fs::rename(&tmp_path, &path).map_err(FsError::from)?;

        let mut table = self.descriptors.lock().await;
        for existing_id in inner.descriptors.clone() {
            if let Some(descriptor) = table.get_mut(&existing_id) {
                descriptor.stream = None;
                let reopened = OpenOptions::new().read(true).write(true).open(&path).map_err(FsError::from)?;
                descriptor.file = reopened;
                descriptor.offset = 0;
            }
        }
        Ok(())
    }

    /// A non-zero target decompresses
    /// in place first; a zero target just drops the codec stream state,
    /// neither requires invoking the decoder for the zero case.
    pub async fn set_size(&self, relative: &Path, size: u64) -> FsResult<()> {
        let path = self.backing_path(relative);
        let state = self.registry.acquire(&path, true).await;
        let mut inner = state.inner.lock().await;

        if let Some(codec_id) = inner.codec {
            if size > 0 {
                self.decompress_in_place(&mut inner, codec_id).await?;
            } else {
                inner.codec = None;
                let mut table = self.descriptors.lock().await;
                for existing_id in inner.descriptors.clone() {
                    if let Some(descriptor) = table.get_mut(&existing_id) {
                        descriptor.stream = None;
                        descriptor.offset = 0;
                    }
                }
            }
        }

        let file = OpenOptions::new().write(true).open(&path).map_err(FsError::from)?;
        file.set_len(size).map_err(FsError::from)?;
        inner.size = FileSize::Known(size);
        drop(inner);
        self.registry.release(&state, &self.queue, &self.policy).await;
        Ok(())
    }

    pub(crate) async fn decompress_in_place(&self, inner: &mut FileStateInner, codec_id: CodecId) -> FsResult<()> {
        let path = inner.path.clone();
        let tmp_path = self.temp_path_for(&path);
        let src = std::fs::File::open(&path).map_err(FsError::from)?;
        let tmp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(FsError::from)?;

        let codec = self.codecs.get(codec_id);
        tokio::task::spawn_blocking(move || {
            src.seek_to(HEADER_LEN)?;
            codec.decompress(&src, &tmp_file)
        })
        .await
        .expect("decompress task panicked")
        .map_err(FsError::from)?;

        std::fs::rename(&tmp_path, &path).map_err(FsError::from)?;
        inner.codec = None;

        let mut table = self.descriptors.lock().await;
        for existing_id in inner.descriptors.clone() {
            if let Some(descriptor) = table.get_mut(&existing_id) {
                descriptor.stream = None;
                let reopened = OpenOptions::new().read(true).write(true).open(&path).map_err(FsError::from)?;
                descriptor.file = reopened;
                descriptor.offset = 0;
            }
        }
        Ok(())
    }

    /// Full-file compress-or-recompress cycle used by the background
    /// worker. Eligibility is re-checked under the record's own lock
    /// immediately before the rewrite.
    pub(crate) async fn compress_full(&self, state: &Arc<FileState>, cancel: &CancelCookie) -> FsResult<()> {
        let mut inner = state.inner.lock().await;
        let eligible = !inner.deleted
            && inner.accesses == 0
            && inner.codec.is_none()
            && !inner.dontcompress
            && matches!(inner.size, FileSize::Known(sz) if sz >= self.policy.min_background_size(&inner.path));
        if !eligible {
            return Ok(());
        }

        let path = inner.path.clone();
        let tmp_path = self.temp_path_for(&path);
        let src = std::fs::File::open(&path).map_err(FsError::from)?;
        let tmp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(FsError::from)?;

        let codec = self.codecs.get(self.default_codec);
        let cancel2 = cancel.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
            codec.compress(&cancel2, &src, &tmp_file)
        })
        .await
        .expect("compress task panicked");

        match result {
            Ok(_) if cancel.is_cancelled() => {
                let _ = std::fs::remove_file(&tmp_path);
                warn!(path = %path.display(), "background compression cancelled");
                Ok(())
            }
            Ok(size) => {
                finalize_compressed_temp(&tmp_path, &path, self.default_codec, size)?;
                inner.codec = Some(self.default_codec);
                inner.size = FileSize::Known(size);
                Ok(())
            }
            Err(err) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(FsError::from(err))
            }
        }
    }
}

/// Re-lay out the temp file as header-then-body: `compress_full` writes
/// compressed bytes starting at offset 0 (no room reserved for the
/// header), so the header is written to a second temp file and the body
/// appended via `io::copy`, then the result replaces the original.
fn finalize_compressed_temp(tmp_path: &Path, dest: &Path, codec: CodecId, size: u64) -> FsResult<()> {
    use std::io::{Read, Write};

    let mut body = std::fs::File::open(tmp_path).map_err(FsError::from)?;
    let final_tmp = tmp_path.with_extension("hdr");
    let mut out = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&final_tmp)
        .map_err(FsError::from)?;
    Header::write(&out, Header { codec, size }).map_err(FsError::from)?;
    out.seek(SeekFrom::Start(HEADER_LEN)).map_err(FsError::from)?;
    let mut buf = [0u8; STREAM_CHUNK];
    loop {
        let n = body.read(&mut buf).map_err(FsError::from)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).map_err(FsError::from)?;
    }
    drop(out);
    let _ = std::fs::remove_file(tmp_path);
    std::fs::rename(&final_tmp, dest).map_err(FsError::from)?;
    Ok(())
}

trait SeekExt {
    fn seek_to_start(&self) -> std::io::Result<u64>;
    fn seek_to(&self, pos: u64) -> std::io::Result<u64>;
}

impl SeekExt for std::fs::File {
    fn seek_to_start(&self) -> std::io::Result<u64> {
        let mut file = self;
        file.seek(SeekFrom::Start(0))
    }

    fn seek_to(&self, pos: u64) -> std::io::Result<u64> {
        let mut file = self;
        file.seek(SeekFrom::Start(pos))
    }
}

fn reopen_stream_reader(
    codecs: &crate::codec::CodecRegistry,
    codec_id: CodecId,
    descriptor: &mut Descriptor,
) -> FsResult<()> {
    descriptor.file.seek_to(HEADER_LEN).map_err(FsError::from)?;
    let fd = descriptor.file.try_clone().map_err(FsError::from)?;
    let codec = codecs.get(codec_id);
    descriptor.stream = Some(CodecStream::Reader(codec.open_reader(fd).map_err(FsError::from)?));
    descriptor.offset = 0;
    Ok(())
}

fn read_from_stream(descriptor: &mut Descriptor, buf: &mut [u8]) -> FsResult<usize> {
    match &mut descriptor.stream {
        Some(CodecStream::Reader(reader)) => reader.read(buf).map_err(FsError::from),
        _ => Err(FsError::Invalid),
    }
}

async fn positional_read(file: &std::fs::File, offset: u64, len: usize) -> FsResult<Vec<u8>> {
    let file = file.try_clone().map_err(FsError::from)?;
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; len];
        let n = file.read_at(&mut buf, offset)?;
        buf.truncate(n);
        Ok::<_, std::io::Error>(buf)
    })
    .await
    .expect("blocking read task panicked")
    .map_err(FsError::from)
}

async fn positional_write(file: &std::fs::File, offset: u64, data: &[u8]) -> FsResult<u32> {
    let file = file.try_clone().map_err(FsError::from)?;
    let data = data.to_vec();
    tokio::task::spawn_blocking(move || {
        file.write_at(&data, offset)?;
        Ok::<_, std::io::Error>(data.len() as u32)
    })
    .await
    .expect("blocking write task panicked")
    .map_err(FsError::from)
}
