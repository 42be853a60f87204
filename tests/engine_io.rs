mod common;

use std::path::Path;

use common::Fixture;
use compressfs::codec::CodecId;
use compressfs::header::Header;

#[tokio::test]
async fn sequential_append_produces_a_compressed_file_with_no_rewrite() {
    let fx = Fixture::with_codec(CodecId::Gzip);
    let path = Path::new("seq.bin");

    let id = fx.engine.open(path, true, true, true).await.unwrap();
    fx.engine.write(id, 0, b"0123456789").await.unwrap();
    fx.engine.write(id, 10, b"abcdefghij").await.unwrap();
    fx.engine.release(id).await.unwrap();

    let header = Header::read_from_path(&fx.path("seq.bin")).unwrap();
    assert!(header.is_some(), "purely sequential appends should stay compressed");
    assert_eq!(header.unwrap().size, 20);
}

#[tokio::test]
async fn non_sequential_write_rolls_back_to_raw_storage() {
    let fx = Fixture::with_codec(CodecId::Gzip);
    let path = Path::new("rand.bin");

    let id = fx.engine.open(path, true, true, true).await.unwrap();
    fx.engine.write(id, 0, b"0123456789").await.unwrap();
    // A write that does not land exactly at the stream's current end
    // forces a rewrite to raw storage (the rollback-to-raw policy).
    fx.engine.write(id, 2, b"XY").await.unwrap();
    fx.engine.release(id).await.unwrap();

    assert!(Header::read_from_path(&fx.path("rand.bin")).unwrap().is_none());
    let data = std::fs::read(fx.path("rand.bin")).unwrap();
    assert_eq!(&data, b"01XY456789");
}

#[tokio::test]
async fn read_skip_accounting_is_monotonic_across_forward_seeks() {
    let fx = Fixture::with_codec(CodecId::Gzip);
    let path = Path::new("readback.bin");
    let payload: Vec<u8> = b"0123456789".iter().cycle().take(1000).copied().collect();

    let id = fx.engine.open(path, true, true, true).await.unwrap();
    fx.engine.write(id, 0, &payload).await.unwrap();
    fx.engine.release(id).await.unwrap();

    let id2 = fx.engine.open(path, false, true, false).await.unwrap();
    let first = fx.engine.read(id2, 0, 10).await.unwrap();
    assert_eq!(&first, &payload[0..10]);
    let skipped_after_first = current_skipped(&fx, &fx.path("readback.bin")).await;
    assert_eq!(skipped_after_first, 0, "a read starting at the stream's own position skips nothing");

    let second = fx.engine.read(id2, 500, 10).await.unwrap();
    assert_eq!(&second, &payload[500..510]);
    let skipped_after_second = current_skipped(&fx, &fx.path("readback.bin")).await;
    assert!(skipped_after_second > skipped_after_first, "forward seek must advance the skip counter");

    let third = fx.engine.read(id2, 600, 10).await.unwrap();
    assert_eq!(&third, &payload[600..610]);
    let skipped_after_third = current_skipped(&fx, &fx.path("readback.bin")).await;
    assert!(skipped_after_third > skipped_after_second, "the skip counter never resets between reads");

    fx.engine.release(id2).await.unwrap();
}

async fn current_skipped(fx: &Fixture, path: &std::path::Path) -> u64 {
    let state = fx.engine.registry.acquire(path, false).await;
    let skipped = state.inner.lock().await.skipped;
    fx.engine.registry.release(&state, &fx.engine.queue, &fx.engine.policy).await;
    skipped
}
