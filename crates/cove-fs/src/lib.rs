//! # cove-fs: handle-oriented filesystem surface over SMB shares
//!
//! Mirrors the browser File System Access model: directory and file
//! handles obtained by name, async enumeration, chunked reads, a
//! writable-stream state machine, permission queries, and change
//! watching — all over a remote SMB share addressed by URL.
//!
//! ```rust,ignore
//! let root = cove_fs::connect("smb://nas.local/public?sec=ntlmssp").await?;
//! let file = root.get_file_handle("notes.txt", Default::default()).await?;
//! println!("{}", file.get_file().await?.text().await?);
//! ```
//!
//! Handles are descriptive values (endpoint + path + kind); every
//! operation is a future completed by the share's I/O driver in
//! `cove-smb`.

#![warn(missing_docs)]

pub mod dir;
pub mod error;
pub mod file;
pub mod handle;
pub mod path;
pub mod watch;
pub mod write;

pub use dir::{
    DirEntries, DirKeys, DirValues, GetDirectoryOptions, GetFileOptions, RemoveOptions,
    SmbDirectoryHandle, SmbEntry,
};
pub use error::{Error, Result};
pub use file::{Blob, ByteStream, SmbFile, SmbFileHandle};
pub use handle::{HandleKind, PermissionMode, PermissionState, SmbHandle, StatRecord};
pub use path::PathRef;
pub use watch::{WatchAction, WatchEvent, Watcher};
pub use write::{CreateWritableOptions, StreamWriter, WritableStream, WriteCommand, WritePayload};

// The session-layer types callers configure connections with.
pub use cove_smb::{AuthMode, ContextPool, SmbConfig, SmbEndpoint};

use std::sync::{Arc, OnceLock};

use crate::error::{client_error, NameContext};

fn default_pool() -> &'static ContextPool {
    static POOL: OnceLock<ContextPool> = OnceLock::new();
    POOL.get_or_init(|| ContextPool::new(SmbConfig::default()))
}

/// Open the root directory handle for a share URL, using the
/// process-wide default pool.
pub async fn connect(url: &str) -> Result<SmbDirectoryHandle> {
    connect_with(default_pool(), url).await
}

/// Open the root directory handle for a share URL against an explicit
/// pool.
///
/// The handle is lazy: the session is established, but the path the URL
/// points at is not stat'ed until an operation needs it.
pub async fn connect_with(pool: &ContextPool, url: &str) -> Result<SmbDirectoryHandle> {
    let endpoint =
        SmbEndpoint::parse(url).map_err(|e| client_error(e, NameContext::Entry("")))?;
    let root = PathRef::from_segments(endpoint.root.clone())?;
    let guard = pool
        .acquire(&endpoint)
        .await
        .map_err(|e| client_error(e, NameContext::Entry("")))?;
    Ok(SmbDirectoryHandle::from_handle(SmbHandle::new(
        Arc::new(guard),
        root,
        HandleKind::Directory,
    )))
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use cove_smb::{ClientFactory, ContextPool, MockClient, MockShare, SmbConfig, SmbEndpoint};

    use crate::dir::SmbDirectoryHandle;

    pub(crate) fn mock_factory(share: Arc<MockShare>) -> ClientFactory {
        Arc::new(move |_: &SmbEndpoint| {
            Box::new(MockClient::with_share(share.clone())) as Box<dyn cove_smb::ShareClient>
        })
    }

    pub(crate) async fn mock_root_with(
        config: SmbConfig,
    ) -> (SmbDirectoryHandle, Arc<MockShare>) {
        let share = MockShare::with_fixture();
        let pool = ContextPool::with_factory(config, mock_factory(share.clone()));
        let root = crate::connect_with(&pool, "smb://mock.test/share")
            .await
            .expect("mock connect");
        (root, share)
    }

    pub(crate) async fn mock_root() -> (SmbDirectoryHandle, Arc<MockShare>) {
        mock_root_with(SmbConfig::default()).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use super::testutil::{mock_root, mock_root_with};
    use super::*;

    #[tokio::test]
    async fn test_root_handle_shape() {
        let (root, _share) = mock_root().await;
        assert_eq!(root.kind(), HandleKind::Directory);
        // Root displays the share name.
        assert_eq!(root.name(), "share");
        assert!(root.path().is_root());
    }

    #[tokio::test]
    async fn test_get_file_handle_reads_fixture() {
        let (root, _share) = mock_root().await;
        let file = root
            .get_file_handle("annar", Default::default())
            .await
            .unwrap();
        let record = file.get_file().await.unwrap();
        assert_eq!(record.size(), 123);
        let text = record.text().await.unwrap();
        assert!(text.starts_with("In order to make sure"));
    }

    #[tokio::test]
    async fn test_missing_lookups_use_contract_messages() {
        let (root, _share) = mock_root().await;
        let err = root
            .get_directory_handle("lost", Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Directory \"lost\" not found");
        let err = root
            .get_file_handle("lost", Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File \"lost\" not found");
        let err = root
            .remove_entry("lost", Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Entry \"lost\" not found");
    }

    #[tokio::test]
    async fn test_kind_mismatch() {
        let (root, _share) = mock_root().await;
        let err = root
            .get_directory_handle("annar", Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch));
        let err = root
            .get_file_handle("first", Default::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch));
    }

    #[tokio::test]
    async fn test_create_directory_and_file() {
        let (root, _share) = mock_root().await;
        let dir = root
            .get_directory_handle("fresh", GetDirectoryOptions { create: true })
            .await
            .unwrap();
        let file = dir
            .get_file_handle("inside", GetFileOptions { create: true })
            .await
            .unwrap();
        assert_eq!(file.get_file().await.unwrap().size(), 0);
        // Both are visible without create now.
        root.get_directory_handle("fresh", Default::default())
            .await
            .unwrap();
        dir.get_file_handle("inside", Default::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_child_names_rejected() {
        let (root, _share) = mock_root().await;
        for name in ["..", ".", "a/b", "a\\b", ""] {
            let err = root
                .get_file_handle(name, Default::default())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidName(_)), "accepted {name:?}");
        }
    }

    #[tokio::test]
    async fn test_remove_entry_file_then_not_found() {
        let (root, _share) = mock_root().await;
        root.remove_entry("annar", Default::default()).await.unwrap();
        let err = root
            .get_file_handle("annar", Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File \"annar\" not found");
    }

    #[tokio::test]
    async fn test_remove_entry_refuses_populated_directory() {
        let (root, _share) = mock_root().await;
        let err = root
            .remove_entry("first", Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Directory \"first\" is not empty");
    }

    #[tokio::test]
    async fn test_remove_entry_recursive() {
        let (root, _share) = mock_root().await;
        root.remove_entry("first", RemoveOptions { recursive: true })
            .await
            .unwrap();
        let err = root
            .get_directory_handle("first", Default::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Directory \"first\" not found");
    }

    #[tokio::test]
    async fn test_iteration_completeness() {
        let (root, _share) = mock_root().await;
        let expected: BTreeSet<String> =
            ["3", "annar", "first", "quatre"].map(String::from).into();

        let mut entries = root.entries();
        let mut from_entries = BTreeSet::new();
        while let Some((name, entry)) = entries.next_entry().await.unwrap() {
            assert_eq!(name, entry.name());
            from_entries.insert(name);
        }

        let mut keys = root.keys();
        let mut from_keys = BTreeSet::new();
        while let Some(name) = keys.next_key().await.unwrap() {
            from_keys.insert(name);
        }

        let mut values = root.values();
        let mut from_values = BTreeSet::new();
        while let Some(entry) = values.next_value().await.unwrap() {
            from_values.insert(entry.name().to_string());
        }

        assert_eq!(from_entries, expected);
        assert_eq!(from_keys, expected);
        assert_eq!(from_values, expected);
    }

    #[tokio::test]
    async fn test_entry_kinds_from_iteration() {
        let (root, _share) = mock_root().await;
        let mut values = root.values();
        while let Some(entry) = values.next_value().await.unwrap() {
            match entry.name() {
                "first" | "quatre" => assert_eq!(entry.kind(), HandleKind::Directory),
                "3" | "annar" => assert_eq!(entry.kind(), HandleKind::File),
                other => panic!("unexpected entry {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_is_same_entry_identity() {
        let (root, _share) = mock_root().await;
        let a = root
            .get_file_handle("annar", Default::default())
            .await
            .unwrap();
        let b = root
            .get_file_handle("annar", Default::default())
            .await
            .unwrap();
        let other = root.get_file_handle("3", Default::default()).await.unwrap();

        assert!(a.is_same_entry(b.as_handle()));
        assert!(a.is_same_entry(a.as_handle()));
        assert!(!a.is_same_entry(other.as_handle()));
        // Kind participates in identity.
        assert!(!root.is_same_entry(a.as_handle()));
    }

    #[tokio::test]
    async fn test_resolve_descendant() {
        let (root, _share) = mock_root().await;
        let first = root
            .get_directory_handle("first", Default::default())
            .await
            .unwrap();
        let comment = first
            .get_file_handle("comment", Default::default())
            .await
            .unwrap();

        assert_eq!(
            root.resolve(comment.as_handle()),
            Some(vec!["first".to_string(), "comment".to_string()])
        );
        assert_eq!(root.resolve(root.as_handle()), Some(vec![]));
        assert_eq!(first.resolve(root.as_handle()), None);
    }

    #[tokio::test]
    async fn test_permission_gate() {
        let (root, share) = mock_root().await;
        share.mark_read_only("3");
        let locked = root.get_file_handle("3", Default::default()).await.unwrap();
        let open = root
            .get_file_handle("annar", Default::default())
            .await
            .unwrap();

        assert_eq!(
            locked.query_permission(PermissionMode::Read).await.unwrap(),
            PermissionState::Granted
        );
        assert_eq!(
            locked
                .query_permission(PermissionMode::ReadWrite)
                .await
                .unwrap(),
            PermissionState::Denied
        );
        assert_eq!(
            open.query_permission(PermissionMode::ReadWrite)
                .await
                .unwrap(),
            PermissionState::Granted
        );
        // request is query: no prompt exists to escalate through.
        assert_eq!(
            locked
                .request_permission(PermissionMode::ReadWrite)
                .await
                .unwrap(),
            PermissionState::Denied
        );
    }

    #[tokio::test]
    async fn test_stat_record() {
        let (root, _share) = mock_root().await;
        let file = root
            .get_file_handle("annar", Default::default())
            .await
            .unwrap();
        let stat = file.stat().await.unwrap();
        assert_eq!(stat.kind, HandleKind::File);
        assert_eq!(stat.size, 123);
        assert!(stat.modified_time > 0);
        assert!(stat.inode.is_none());
    }

    #[tokio::test]
    async fn test_watch_emits_create_and_remove() {
        let (root, share) = mock_root_with(
            SmbConfig::default().watch_interval(Duration::from_millis(20)),
        )
        .await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = root.watch(move |event| {
            let _ = tx.send(event);
        });

        // Give the baseline scan a moment, then mutate.
        tokio::time::sleep(Duration::from_millis(60)).await;
        share.insert_file("newcomer", b"hi");

        let mut saw_create = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline && !saw_create {
            if let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            {
                if event.path == "newcomer" && event.action == WatchAction::Create {
                    saw_create = true;
                }
            }
        }
        assert!(saw_create, "create event never arrived");

        root.remove_entry("newcomer", Default::default())
            .await
            .unwrap();
        let mut saw_remove = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline && !saw_remove {
            if let Ok(Some(event)) =
                tokio::time::timeout(Duration::from_millis(100), rx.recv()).await
            {
                if event.path == "newcomer" && event.action == WatchAction::Remove {
                    saw_remove = true;
                }
            }
        }
        assert!(saw_remove, "remove event never arrived");

        watcher.cancel();
        watcher.wait().await;
    }
}
