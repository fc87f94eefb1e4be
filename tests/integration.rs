//! End-to-end tests over the mock backend
//!
//! The fixture share matches the reference layout: `annar` holding the
//! 123-byte sentence, empty file `3`, and directories `first` (with
//! `comment`) and `quatre` (with `points`).

use std::sync::Arc;

use cove::smb::{ClientFactory, MockClient, MockShare, ShareClient, SmbEndpoint};
use cove::{
    connect_with, ContextPool, CreateWritableOptions, GetFileOptions, HandleKind, RemoveOptions,
    SmbConfig, SmbDirectoryHandle, SmbFileHandle, WriteCommand, WritePayload,
};

const SENTENCE: &str = "In order to make sure that this file is exactly 123 bytes in size, \
                        I have written this text while watching its chars count.";

fn mock_factory(share: Arc<MockShare>) -> ClientFactory {
    Arc::new(move |_: &SmbEndpoint| {
        Box::new(MockClient::with_share(share.clone())) as Box<dyn ShareClient>
    })
}

async fn fixture_root() -> (SmbDirectoryHandle, ContextPool) {
    let share = MockShare::with_fixture();
    let pool = ContextPool::with_factory(SmbConfig::default(), mock_factory(share));
    let root = connect_with(&pool, "smb://fixture.test/share")
        .await
        .expect("connect");
    (root, pool)
}

async fn new_file(root: &SmbDirectoryHandle, name: &str) -> SmbFileHandle {
    root.get_file_handle(name, GetFileOptions { create: true })
        .await
        .expect("create file")
}

async fn contents(root: &SmbDirectoryHandle, name: &str) -> Vec<u8> {
    root.get_file_handle(name, Default::default())
        .await
        .expect("file handle")
        .get_file()
        .await
        .expect("get_file")
        .array_buffer()
        .await
        .expect("read")
        .to_vec()
}

/// Scenario 1: the fixture sentence reads back exactly.
#[tokio::test]
async fn scenario_read_annar() {
    let (root, _pool) = fixture_root().await;
    let file = root
        .get_file_handle("annar", Default::default())
        .await
        .unwrap()
        .get_file()
        .await
        .unwrap();
    assert_eq!(file.size(), 123);
    assert_eq!(file.text().await.unwrap(), SENTENCE);
}

/// Scenario 2: a slice is a clamped window with its own type.
#[tokio::test]
async fn scenario_slice() {
    let (root, _pool) = fixture_root().await;
    let file = root
        .get_file_handle("annar", Default::default())
        .await
        .unwrap()
        .get_file()
        .await
        .unwrap();
    let blob = file.slice(Some(12), Some(65), Some("text/plain"));
    assert_eq!(blob.size(), 53);
    assert_eq!(blob.content_type(), "text/plain");
    assert_eq!(
        blob.text().await.unwrap(),
        "make sure that this file is exactly 123 bytes in size"
    );
}

/// Negative slice indices count back from the end.
#[tokio::test]
async fn scenario_slice_negative_indices() {
    let (root, _pool) = fixture_root().await;
    let file = root
        .get_file_handle("annar", Default::default())
        .await
        .unwrap()
        .get_file()
        .await
        .unwrap();
    let blob = file.slice(Some(-6), None, None);
    assert_eq!(blob.text().await.unwrap(), "count.");
    // Out-of-range ends clamp rather than error.
    let blob = file.slice(Some(-1000), Some(2), None);
    assert_eq!(blob.text().await.unwrap(), "In");
}

/// Scenario 3: a positioned write past EOF zero-fills the gap.
#[tokio::test]
async fn scenario_sparse_write() {
    let (root, _pool) = fixture_root().await;
    let file = new_file(&root, "sparse").await;
    let stream = file.create_writable(Default::default()).await.unwrap();
    stream.write("hello rust").await.unwrap();
    stream
        .write(WriteCommand::Write {
            data: WritePayload::from("tsur olleh"),
            position: Some(13),
        })
        .await
        .unwrap();
    stream.close().await.unwrap();

    let bytes = contents(&root, "sparse").await;
    assert_eq!(bytes, b"hello rust\0\0\0tsur olleh");
    assert_eq!(bytes.len(), 23);
}

/// Scenario 4: truncate-up zero-fills and a cursor at EOF follows it.
#[tokio::test]
async fn scenario_truncate_up_then_write() {
    let (root, _pool) = fixture_root().await;
    let file = new_file(&root, "grown").await;
    let stream = file.create_writable(Default::default()).await.unwrap();
    stream.write("hello rust").await.unwrap();
    stream.truncate(11).await.unwrap();
    stream.write("tsur olleh").await.unwrap();
    stream.close().await.unwrap();

    let bytes = contents(&root, "grown").await;
    assert_eq!(bytes, b"hello rust\0tsur olleh");
    assert_eq!(bytes.len(), 21);
}

/// Scenario 5: a 10 MiB file streams as exactly 8 MiB + 2 MiB chunks.
#[tokio::test]
async fn scenario_large_file_stream_chunks() {
    const MIB: usize = 1024 * 1024;
    let (root, _pool) = fixture_root().await;

    let payload: Vec<u8> = (0..10 * MIB).map(|i| (i % 251) as u8).collect();
    let file = new_file(&root, "large.bin").await;
    let stream = file.create_writable(Default::default()).await.unwrap();
    stream.write(payload.clone()).await.unwrap();
    stream.close().await.unwrap();

    let record = file.get_file().await.unwrap();
    assert_eq!(record.size(), 10 * MIB as u64);

    let mut chunks = Vec::new();
    let mut reader = record.stream();
    while let Some(chunk) = reader.next_chunk().await.unwrap() {
        chunks.push(chunk);
    }
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].len(), 8 * MIB);
    assert_eq!(chunks[1].len(), 2 * MIB);
    let mut rejoined = Vec::with_capacity(10 * MIB);
    for chunk in &chunks {
        rejoined.extend_from_slice(chunk);
    }
    assert_eq!(rejoined, payload);
}

/// Scenario 6: writer lock and closed-stream state errors.
#[tokio::test]
async fn scenario_writer_lock() {
    let (root, _pool) = fixture_root().await;
    let file = new_file(&root, "locked").await;
    let stream = file.create_writable(Default::default()).await.unwrap();

    let writer = stream.get_writer().await.unwrap();
    let err = stream.get_writer().await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid state: WritableStream is locked");

    writer.write("held").await.unwrap();
    writer.close().await.unwrap();
    let err = writer.close().await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid state: WritableStream is closed");
}

/// releaseLock returns the stream to direct use.
#[tokio::test]
async fn writer_release_lock() {
    let (root, _pool) = fixture_root().await;
    let file = new_file(&root, "relock").await;
    let stream = file.create_writable(Default::default()).await.unwrap();

    let mut writer = stream.get_writer().await.unwrap();
    let err = stream.write("direct").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid state: WritableStream is locked");
    writer.release_lock().await;

    stream.write("direct").await.unwrap();
    stream.get_writer().await.unwrap();
    stream.close().await.unwrap();
}

/// keepExistingData overwrites in place from offset zero.
#[tokio::test]
async fn keep_existing_data_prefix_replace() {
    let (root, _pool) = fixture_root().await;
    let file = root
        .get_file_handle("annar", Default::default())
        .await
        .unwrap();
    let stream = file
        .create_writable(CreateWritableOptions {
            keep_existing_data: true,
        })
        .await
        .unwrap();
    assert_eq!(stream.size().await, 123);
    stream.write("XXXX").await.unwrap();
    stream.close().await.unwrap();

    let bytes = contents(&root, "annar").await;
    assert_eq!(bytes.len(), 123);
    assert_eq!(&bytes[..4], b"XXXX");
    assert_eq!(&bytes[4..], &SENTENCE.as_bytes()[4..]);
}

/// Default createWritable truncates.
#[tokio::test]
async fn create_writable_truncates_by_default() {
    let (root, _pool) = fixture_root().await;
    let file = root
        .get_file_handle("annar", Default::default())
        .await
        .unwrap();
    let stream = file.create_writable(Default::default()).await.unwrap();
    assert_eq!(stream.size().await, 0);
    stream.write("short").await.unwrap();
    stream.close().await.unwrap();
    assert_eq!(contents(&root, "annar").await, b"short");
}

/// Round-trip: a 10 MiB buffer written then read back compares equal.
#[tokio::test]
async fn round_trip_large_buffer() {
    const MIB: usize = 1024 * 1024;
    let (root, _pool) = fixture_root().await;
    let payload: Vec<u8> = (0..10 * MIB).map(|i| (i / 7 % 256) as u8).collect();

    let file = new_file(&root, "roundtrip").await;
    let stream = file.create_writable(Default::default()).await.unwrap();
    stream.write(payload.clone()).await.unwrap();
    stream.close().await.unwrap();

    assert_eq!(contents(&root, "roundtrip").await, payload);
}

/// Truncate invariant: size lands exactly, cursor never exceeds it.
#[tokio::test]
async fn truncate_invariant() {
    let (root, _pool) = fixture_root().await;
    let file = new_file(&root, "trunc").await;
    let stream = file.create_writable(Default::default()).await.unwrap();
    stream.write("0123456789").await.unwrap();

    stream.truncate(4).await.unwrap();
    assert_eq!(stream.size().await, 4);
    assert!(stream.cursor().await <= 4);

    stream.truncate(100).await.unwrap();
    assert_eq!(stream.size().await, 100);
    stream.close().await.unwrap();

    let bytes = contents(&root, "trunc").await;
    assert_eq!(&bytes[..4], b"0123");
    assert!(bytes[4..].iter().all(|&b| b == 0));
}

/// Seek past EOF is sparse intent: realized as zeroes by the write.
#[tokio::test]
async fn seek_past_eof_reads_back_zeroes() {
    let (root, _pool) = fixture_root().await;
    let file = new_file(&root, "seeky").await;
    let stream = file.create_writable(Default::default()).await.unwrap();
    stream.write("ab").await.unwrap();
    stream.seek(5).await.unwrap();
    stream.write("yz").await.unwrap();
    stream.close().await.unwrap();

    assert_eq!(contents(&root, "seeky").await, b"ab\0\0\0yz");
}

/// Aborting discards the stream without flushing further state.
#[tokio::test]
async fn abort_terminates_stream() {
    let (root, _pool) = fixture_root().await;
    let file = new_file(&root, "aborted").await;
    let stream = file.create_writable(Default::default()).await.unwrap();
    stream.write("partial").await.unwrap();
    let reason = stream.abort("caller went away").await.unwrap();
    assert_eq!(reason, "caller went away");
    let err = stream.write("more").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid state: WritableStream is closed");
}

/// Handles are values: equality is (endpoint, kind, path).
#[tokio::test]
async fn handle_identity_across_endpoints() {
    let share = MockShare::with_fixture();
    let pool = ContextPool::with_factory(SmbConfig::default(), mock_factory(share));
    let root_a = connect_with(&pool, "smb://fixture.test/share").await.unwrap();
    let root_b = connect_with(&pool, "smb://fixture.test/share").await.unwrap();
    let elsewhere = connect_with(&pool, "smb://other.test/share").await.unwrap();

    // Same endpoint: handles from independent connects compare equal.
    let a = root_a
        .get_file_handle("annar", Default::default())
        .await
        .unwrap();
    let b = root_b
        .get_file_handle("annar", Default::default())
        .await
        .unwrap();
    assert!(a.is_same_entry(b.as_handle()));

    // Distinct endpoints never alias, even over the same tree.
    let c = elsewhere
        .get_file_handle("annar", Default::default())
        .await
        .unwrap();
    assert!(!a.is_same_entry(c.as_handle()));
    assert_eq!(root_a.resolve(c.as_handle()), None);
}

/// A handle outlives its entry; operations then report not-found.
#[tokio::test]
async fn handle_outlives_deletion() {
    let (root, _pool) = fixture_root().await;
    let file = root
        .get_file_handle("annar", Default::default())
        .await
        .unwrap();
    root.remove_entry("annar", Default::default()).await.unwrap();

    assert_eq!(file.kind(), HandleKind::File);
    let err = file.get_file().await.unwrap_err();
    assert_eq!(err.to_string(), "File \"annar\" not found");
}

/// Recursive removal takes a populated tree down depth-first.
#[tokio::test]
async fn recursive_removal() {
    let (root, _pool) = fixture_root().await;
    let err = root
        .remove_entry("quatre", RemoveOptions { recursive: false })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Directory \"quatre\" is not empty");

    root.remove_entry("quatre", RemoveOptions { recursive: true })
        .await
        .unwrap();
    let err = root
        .get_directory_handle("quatre", Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Directory \"quatre\" not found");
}

/// MIME types come from the extension table only.
#[tokio::test]
async fn mime_from_extension() {
    let (root, _pool) = fixture_root().await;
    for (name, expected) in [
        ("photo.png", "image/png"),
        ("photo.jpg", "image/jpeg"),
        ("notes.txt", "text/plain"),
        ("annar2", "unknown"),
    ] {
        let file = new_file(&root, name).await;
        assert_eq!(file.get_file().await.unwrap().mime_type(), expected, "{name}");
    }
}

/// Concurrent operations on one context are safe; awaiting sequences.
#[tokio::test]
async fn concurrent_readers_share_context() {
    let (root, _pool) = fixture_root().await;
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let root = root.clone();
        tasks.push(tokio::spawn(async move {
            root.get_file_handle("annar", Default::default())
                .await
                .unwrap()
                .get_file()
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), SENTENCE);
    }
}
