//! Handle identity and the common handle surface
//!
//! A handle is a descriptive value — endpoint + path + kind — not an
//! open resource. Handles may outlive the entries they name; operations
//! on a deleted entry fail with the matching not-found error. All opens
//! are transient and scoped to a single operation or to a writable
//! stream's lifetime.

use std::fmt;
use std::sync::Arc;

use cove_smb::{ClientError, ContextGuard, EntryKind, RawStat, SmbEndpoint};

use crate::error::{client_error, NameContext, Result};
use crate::path::PathRef;

/// Directory or file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Names a directory
    Directory,
    /// Names a regular file
    File,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::File => write!(f, "file"),
        }
    }
}

impl From<HandleKind> for EntryKind {
    fn from(kind: HandleKind) -> Self {
        match kind {
            HandleKind::Directory => Self::Directory,
            HandleKind::File => Self::File,
        }
    }
}

impl From<EntryKind> for HandleKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Directory => Self::Directory,
            EntryKind::File => Self::File,
        }
    }
}

/// Permission being queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Read access
    Read,
    /// Read and write access
    ReadWrite,
}

/// Outcome of a permission query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    /// Access is available
    Granted,
    /// The server's ACL refuses it
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Stat result with epoch-millisecond times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatRecord {
    /// Inode number when the backend supplies one
    pub inode: Option<u64>,
    /// Size in bytes
    pub size: u64,
    /// Creation (birth) time, epoch ms
    pub creation_time: i64,
    /// Last modification time, epoch ms
    pub modified_time: i64,
    /// Last access time, epoch ms
    pub accessed_time: i64,
    /// What the entry is
    pub kind: HandleKind,
}

fn epoch_ms(seconds: u64, nanoseconds: u64) -> i64 {
    (seconds as i64) * 1000 + (nanoseconds as i64) / 1_000_000
}

impl From<RawStat> for StatRecord {
    fn from(raw: RawStat) -> Self {
        Self {
            inode: (raw.inode != 0).then_some(raw.inode),
            size: raw.size,
            creation_time: epoch_ms(raw.btime, raw.btime_nsec),
            modified_time: epoch_ms(raw.mtime, raw.mtime_nsec),
            accessed_time: epoch_ms(raw.atime, raw.atime_nsec),
            kind: raw.kind.into(),
        }
    }
}

/// Descriptive reference to one entry on one share
#[derive(Clone)]
pub struct SmbHandle {
    ctx: Arc<ContextGuard>,
    path: PathRef,
    kind: HandleKind,
}

impl SmbHandle {
    pub(crate) fn new(ctx: Arc<ContextGuard>, path: PathRef, kind: HandleKind) -> Self {
        Self { ctx, path, kind }
    }

    pub(crate) fn ctx(&self) -> &Arc<ContextGuard> {
        &self.ctx
    }

    /// The handle's kind tag.
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// The entry's display name: the last path segment, or the share
    /// name for the root handle.
    pub fn name(&self) -> &str {
        self.path
            .name()
            .unwrap_or_else(|| self.endpoint().share.as_str())
    }

    /// The share-relative path.
    pub fn path(&self) -> &PathRef {
        &self.path
    }

    /// The endpoint the handle belongs to.
    pub fn endpoint(&self) -> &Arc<SmbEndpoint> {
        self.ctx.endpoint()
    }

    /// Value identity: same endpoint, same kind, same path.
    pub fn is_same_entry(&self, other: &SmbHandle) -> bool {
        self.kind == other.kind
            && self.endpoint() == other.endpoint()
            && self.path == other.path
    }

    pub(crate) fn name_context(&self) -> NameContext<'_> {
        match self.kind {
            HandleKind::Directory => NameContext::Directory(self.name()),
            HandleKind::File => NameContext::File(self.name()),
        }
    }

    /// Stat the entry this handle names.
    pub async fn stat(&self) -> Result<StatRecord> {
        self.ctx
            .stat(&self.path.to_share_path())
            .await
            .map(StatRecord::from)
            .map_err(|e| client_error(e, self.name_context()))
    }

    /// Current permission state for `mode`.
    ///
    /// Read access was implied by opening the share, so it is always
    /// granted. Write access is probed against the server's ACL without
    /// modifying the entry.
    pub async fn query_permission(&self, mode: PermissionMode) -> Result<PermissionState> {
        match mode {
            PermissionMode::Read => Ok(PermissionState::Granted),
            PermissionMode::ReadWrite => {
                let probe = self
                    .ctx
                    .write_probe(&self.path.to_share_path(), self.kind.into())
                    .await;
                match probe {
                    Ok(true) => Ok(PermissionState::Granted),
                    Ok(false) | Err(ClientError::AccessDenied) => Ok(PermissionState::Denied),
                    Err(e) => Err(client_error(e, self.name_context())),
                }
            }
        }
    }

    /// Request `mode` access. There is no interactive prompt to show,
    /// so this is the same check as [`Self::query_permission`].
    pub async fn request_permission(&self, mode: PermissionMode) -> Result<PermissionState> {
        self.query_permission(mode).await
    }
}

impl fmt::Debug for SmbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbHandle")
            .field("endpoint", &self.endpoint().to_string())
            .field("path", &self.path.to_share_path())
            .field("kind", &self.kind)
            .finish()
    }
}
