mod common;

use std::path::Path;

use common::Fixture;
use compressfs::codec::CodecId;
use compressfs::header::Header;

#[tokio::test]
async fn foreground_compression_leaves_a_readable_header() {
    let fx = Fixture::with_codec(CodecId::Gzip);
    let path = Path::new("doc.txt");

    let id = fx.engine.open(path, true, true, true).await.unwrap();
    let payload = b"the quick brown fox jumps over the lazy dog, ".repeat(200);
    fx.engine.write(id, 0, &payload).await.unwrap();
    fx.engine.release(id).await.unwrap();

    let header = Header::read_from_path(&fx.path("doc.txt")).unwrap().expect("header present");
    assert_eq!(header.codec, CodecId::Gzip);
    assert_eq!(header.size, payload.len() as u64);
}

#[test]
fn short_file_is_not_mistaken_for_a_header() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), b"hi").unwrap();
    assert!(Header::read_from_path(tmp.path()).unwrap().is_none());
}

#[test]
fn garbage_magic_is_not_mistaken_for_a_header() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), b"not a compressfs header at all, just text").unwrap();
    assert!(Header::read_from_path(tmp.path()).unwrap().is_none());
}
