mod common;

use std::path::Path;

use common::Fixture;
use compressfs::codec::CodecId;
use compressfs::header::Header;

#[tokio::test]
async fn a_second_concurrent_opener_prevents_codec_binding_on_first_write() {
    let fx = Fixture::new();
    let path = Path::new("racing.bin");

    // Both opens land before either write, so by the time the write
    // happens the record's access count is 2, not 1 — the codec-binding
    // decision point requires exactly one opener.
    let id1 = fx.engine.open(path, true, true, true).await.unwrap();
    let id2 = fx.engine.open(path, false, true, true).await.unwrap();

    fx.engine.write(id1, 0, b"hello, world").await.unwrap();
    fx.engine.release(id1).await.unwrap();
    fx.engine.release(id2).await.unwrap();

    assert!(
        Header::read_from_path(&fx.path("racing.bin")).unwrap().is_none(),
        "a racing second opener should force the file to stay raw"
    );
}

#[tokio::test]
async fn hard_linking_an_empty_file_stops_it_from_ever_compressing() {
    let fx = Fixture::new();
    let original = Path::new("original.bin");
    let linked = Path::new("linked.bin");

    let create = fx.engine.open(original, true, true, true).await.unwrap();
    fx.engine.release(create).await.unwrap();

    fx.engine.link(original, linked).await.unwrap();
    assert!(fx.path("linked.bin").exists());

    let id = fx.engine.open(original, false, true, true).await.unwrap();
    fx.engine.write(id, 0, b"hello world").await.unwrap();
    fx.engine.release(id).await.unwrap();

    assert!(
        Header::read_from_path(&fx.path("original.bin")).unwrap().is_none(),
        "a hard-linked file must never be compressed, even on a subsequent solo write"
    );
    assert_eq!(std::fs::read(fx.path("linked.bin")).unwrap(), std::fs::read(fx.path("original.bin")).unwrap());
}

/// Scenario 6 from spec.md §8, literally: two threads racing disjoint,
/// strictly-ordered appending writes against one shared open handle (the
/// common FUSE pattern of one open dispatching writes from several kernel
/// request threads) must still land in a single compressed stream with
/// exactly one codec binding.
#[tokio::test]
async fn two_racing_writers_on_one_handle_land_in_a_single_compressed_stream() {
    let fx = Fixture::with_codec(CodecId::Gzip);
    let path = Path::new("shared.bin");

    let id = fx.engine.open(path, true, true, true).await.unwrap();
    let first = vec![b'A'; 4096];
    let second = vec![b'B'; 4096];

    let engine_a = fx.engine.clone();
    let engine_b = fx.engine.clone();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let writer_a = tokio::spawn(async move {
        engine_a.write(id, 0, &first).await.unwrap();
        let _ = tx.send(());
    });
    let writer_b = tokio::spawn(async move {
        // Strict order: the second write only starts once the first has
        // landed, so it always arrives at the stream's current end.
        rx.await.unwrap();
        engine_b.write(id, 4096, &second).await.unwrap();
    });

    writer_a.await.unwrap();
    writer_b.await.unwrap();
    fx.engine.release(id).await.unwrap();

    let header = Header::read_from_path(&fx.path("shared.bin")).unwrap();
    assert!(header.is_some(), "disjoint sequential writes on one handle must stay compressed");
    assert_eq!(header.unwrap().size, 8192);

    let id2 = fx.engine.open(path, false, true, false).await.unwrap();
    let readback = fx.engine.read(id2, 0, 8192).await.unwrap();
    fx.engine.release(id2).await.unwrap();

    let expected: Vec<u8> = vec![b'A'; 4096].into_iter().chain(vec![b'B'; 4096]).collect();
    assert_eq!(readback, expected);
}
