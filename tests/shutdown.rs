mod common;

use std::path::Path;
use std::sync::Arc;

use common::Fixture;
use compressfs::background::BackgroundCompressor;
use compressfs::codec::CodecId;
use compressfs::header::Header;
use compressfs::shutdown::ShutdownCoordinator;

/// Unmounting with a file still queued for background compression must
/// finish (or cleanly cancel) rather than hang or leave the backing file
/// corrupt.
#[tokio::test]
async fn shutdown_drains_a_queued_background_compression_before_returning() {
    let fx = Fixture::with_codec(CodecId::Gzip);
    let path = Path::new("big.bin");

    // Written directly, bypassing the engine: a raw, untouched, already-
    // on-disk file is exactly the state the background compressor (not
    // the foreground write path) is responsible for picking up.
    let payload: Vec<u8> = b"compressible payload, ".iter().cycle().take(500_000).copied().collect();
    fx.write_file("big.bin", &payload);

    let id = fx.engine.open(path, false, true, false).await.unwrap();
    fx.engine.release(id).await.unwrap();
    assert_eq!(fx.engine.queue_len().await, 1, "an idle raw file should be queued for background compression");

    let worker = Arc::new(BackgroundCompressor::new());
    let worker_handle = worker.clone().spawn(fx.engine.clone());
    let coordinator = ShutdownCoordinator::new(worker.clone());

    coordinator.shutdown(&fx.engine, worker_handle).await;

    assert_eq!(fx.engine.record_count().await, 0);
    assert_eq!(fx.engine.queue_len().await, 0);

    let header = Header::read_from_path(&fx.path("big.bin")).unwrap();
    assert!(header.is_some(), "shutdown must wait for the queued compression to finish, not abandon it mid-flight");
    assert_eq!(header.unwrap().size, payload.len() as u64);

    let on_disk = std::fs::metadata(fx.path("big.bin")).unwrap().len();
    assert!(on_disk < payload.len() as u64, "highly repetitive payload should compress smaller than its raw size");
}

/// Shutdown with nothing outstanding returns immediately rather than
/// looping forever on an empty registry and queue.
#[tokio::test]
async fn shutdown_with_nothing_pending_returns_immediately() {
    let fx = Fixture::new();

    let worker = Arc::new(BackgroundCompressor::new());
    let worker_handle = worker.clone().spawn(fx.engine.clone());
    let coordinator = ShutdownCoordinator::new(worker.clone());

    coordinator.shutdown(&fx.engine, worker_handle).await;

    assert_eq!(fx.engine.record_count().await, 0);
    assert_eq!(fx.engine.queue_len().await, 0);
}
