//! # cove: remote SMB shares as handle-oriented async filesystems
//!
//! Facade over the workspace crates:
//!
//! - [`cove_smb`] (re-exported as [`smb`]) — endpoints, the context
//!   pool, and the per-context I/O driver
//! - [`cove_fs`] (re-exported as [`fs`]) — the File System Access
//!   style handle surface
//!
//! ```rust,ignore
//! let root = cove::connect("smb://user:pw@nas.local/public?sec=ntlmssp").await?;
//! let mut entries = root.entries();
//! while let Some((name, entry)) = entries.next_entry().await? {
//!     println!("{name}: {}", entry.kind());
//! }
//! ```

/// Session layer: endpoints, pool, driver, backends.
pub use cove_smb as smb;

/// Handle layer: directory/file handles, streams, watcher.
pub use cove_fs as fs;

pub use cove_fs::{
    connect, connect_with, Blob, ByteStream, CreateWritableOptions, DirEntries, DirKeys,
    DirValues, Error, GetDirectoryOptions, GetFileOptions, HandleKind, PathRef, PermissionMode,
    PermissionState, RemoveOptions, Result, SmbDirectoryHandle, SmbEntry, SmbFile, SmbFileHandle,
    SmbHandle, StatRecord, StreamWriter, WatchAction, WatchEvent, Watcher, WritableStream,
    WriteCommand, WritePayload,
};
pub use cove_smb::{AuthMode, ContextPool, SmbConfig, SmbEndpoint};
