mod common;

use std::path::Path;

use common::Fixture;

#[tokio::test]
async fn concurrent_opens_share_one_record() {
    let fx = Fixture::new();
    fx.write_file("a.txt", b"hello");
    let path = Path::new("a.txt");

    let a = fx.engine.open(path, false, true, false).await.unwrap();
    let b = fx.engine.open(path, false, true, false).await.unwrap();
    assert_eq!(fx.engine.record_count().await, 1);

    fx.engine.release(a).await.unwrap();
    fx.engine.release(b).await.unwrap();
}

#[tokio::test]
async fn tombstoned_record_does_not_survive_into_a_recreated_file() {
    let fx = Fixture::new();
    fx.write_file("b.txt", b"data");
    let path = Path::new("b.txt");

    let id = fx.engine.open(path, false, true, false).await.unwrap();
    fx.engine.unlink(path).await.unwrap();
    fx.engine.release(id).await.unwrap();
    assert_eq!(fx.engine.record_count().await, 0);

    fx.write_file("b.txt", b"new content");
    let id2 = fx.engine.open(path, false, true, false).await.unwrap();
    assert_eq!(fx.engine.record_count().await, 1);
    let data = fx.engine.read(id2, 0, 11).await.unwrap();
    assert_eq!(&data, b"new content");
    fx.engine.release(id2).await.unwrap();
}

#[tokio::test]
async fn rename_transfers_record_identity_to_an_already_open_descriptor() {
    let fx = Fixture::new();
    fx.write_file("old.txt", b"content");
    let from = Path::new("old.txt");
    let to = Path::new("new.txt");

    let id = fx.engine.open(from, false, true, false).await.unwrap();
    fx.engine.rename(from, to).await.unwrap();

    // The descriptor opened under the old name keeps working: its fd
    // follows the inode, not the path, and the record's identity moved
    // with it rather than being tombstoned.
    let data = fx.engine.read(id, 0, 7).await.unwrap();
    assert_eq!(&data, b"content");
    assert_eq!(fx.engine.record_count().await, 1);

    fx.engine.release(id).await.unwrap();
    assert!(fx.path("new.txt").exists());
    assert!(!fx.path("old.txt").exists());
}
