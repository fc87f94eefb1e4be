//! The backend contract
//!
//! [`ShareClient`] is the synchronous face of an SMB client library.
//! It is deliberately not thread-safe to use: every call must happen on
//! the context's driver thread, which is the only owner of the boxed
//! client. Callers never see this trait directly; they go through
//! [`SmbContext`](crate::SmbContext).

use std::fmt::Debug;
use std::sync::Arc;

use crate::endpoint::SmbEndpoint;
use crate::error::Result;

/// Entry kind as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
}

/// Stat result in server units (seconds + nanoseconds since the epoch)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawStat {
    /// Inode number, 0 when the backend cannot supply one
    pub inode: u64,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Entry kind
    pub kind: EntryKind,
    /// Last access time, seconds part
    pub atime: u64,
    /// Last access time, nanoseconds part
    pub atime_nsec: u64,
    /// Last modification time, seconds part
    pub mtime: u64,
    /// Last modification time, nanoseconds part
    pub mtime_nsec: u64,
    /// Status change time, seconds part
    pub ctime: u64,
    /// Status change time, nanoseconds part
    pub ctime_nsec: u64,
    /// Creation (birth) time, seconds part
    pub btime: u64,
    /// Creation (birth) time, nanoseconds part
    pub btime_nsec: u64,
}

impl Default for EntryKind {
    fn default() -> Self {
        Self::File
    }
}

/// One directory entry from a readdir step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirEntry {
    /// Entry name (no path components)
    pub name: String,
    /// Entry kind
    pub kind: EntryKind,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, seconds part
    pub mtime: u64,
    /// Last modification time, nanoseconds part
    pub mtime_nsec: u64,
}

/// Opaque server-side file handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawFd(pub u64);

/// Opaque server-side directory enumeration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawDir(pub u64);

/// Open disposition for [`ShareClient::open`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for writing (read is always implied)
    pub write: bool,
    /// Create the file if it does not exist
    pub create: bool,
    /// Truncate to zero length on open
    pub truncate: bool,
}

impl OpenFlags {
    /// Read-only open
    pub fn read() -> Self {
        Self::default()
    }

    /// Open for writing, preserving existing contents
    pub fn write_keep() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    /// Open for writing, discarding existing contents
    pub fn write_truncate() -> Self {
        Self {
            write: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// Create a new zero-length file (or open an existing one)
    pub fn create() -> Self {
        Self {
            write: true,
            create: true,
            ..Self::default()
        }
    }
}

/// Synchronous SMB client backend
///
/// Paths are share-relative with `/` separators and no leading slash;
/// the empty string names the share root. All methods run on the
/// driver thread only.
pub trait ShareClient: Send + Debug {
    /// Establish the session described by the endpoint.
    fn connect(&mut self, endpoint: &SmbEndpoint) -> Result<()>;

    /// Tear the session down. Called once, from the driver thread,
    /// before the thread exits.
    fn disconnect(&mut self);

    /// Server-imposed ceiling for a single read or write request.
    fn max_io_size(&self) -> u64;

    /// Stat an entry by path.
    fn stat(&mut self, path: &str) -> Result<RawStat>;

    /// Open a file.
    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<RawFd>;

    /// Close an open file. Errors are not interesting to callers.
    fn close(&mut self, fd: RawFd);

    /// Stat an open file.
    fn fstat(&mut self, fd: RawFd) -> Result<RawStat>;

    /// Read up to `len` bytes at `offset`. Short reads happen at EOF.
    fn pread(&mut self, fd: RawFd, offset: u64, len: u32) -> Result<Vec<u8>>;

    /// Write `data` at `offset`, returning the committed byte count.
    fn pwrite(&mut self, fd: RawFd, offset: u64, data: &[u8]) -> Result<u32>;

    /// Set an open file's length, zero-filling on growth.
    fn ftruncate(&mut self, fd: RawFd, len: u64) -> Result<()>;

    /// Flush an open file's dirty state to the server.
    fn fsync(&mut self, fd: RawFd) -> Result<()>;

    /// Begin enumerating a directory.
    fn opendir(&mut self, path: &str) -> Result<RawDir>;

    /// One enumeration step; `None` when exhausted.
    fn readdir(&mut self, dir: RawDir) -> Result<Option<RawDirEntry>>;

    /// Release an enumeration handle.
    fn closedir(&mut self, dir: RawDir);

    /// Create a directory.
    fn mkdir(&mut self, path: &str) -> Result<()>;

    /// Remove an empty directory.
    fn rmdir(&mut self, path: &str) -> Result<()>;

    /// Remove a file.
    fn unlink(&mut self, path: &str) -> Result<()>;

    /// Probe whether the session may write the entry, without
    /// modifying it. Must be idempotent and side-effect-free.
    fn write_probe(&mut self, path: &str, kind: EntryKind) -> Result<bool>;
}

/// Produces a fresh backend for an endpoint
pub type ClientFactory = Arc<dyn Fn(&SmbEndpoint) -> Box<dyn ShareClient> + Send + Sync>;

/// The default backend selection.
///
/// `TEST_USING_MOCKS` in the environment selects the in-memory mock
/// backend (the reference harness sets it); otherwise the libsmb2
/// backend is used when this crate was built with the `libsmb2`
/// feature. Without that feature the mock is the only backend and is
/// used unconditionally.
pub fn default_factory() -> ClientFactory {
    Arc::new(|endpoint: &SmbEndpoint| new_default_client(endpoint))
}

#[cfg(feature = "libsmb2")]
fn new_default_client(endpoint: &SmbEndpoint) -> Box<dyn ShareClient> {
    if std::env::var_os("TEST_USING_MOCKS").is_some() {
        Box::new(crate::mock::MockClient::for_endpoint(endpoint))
    } else {
        Box::new(crate::libsmb::LibsmbClient::new())
    }
}

#[cfg(not(feature = "libsmb2"))]
fn new_default_client(endpoint: &SmbEndpoint) -> Box<dyn ShareClient> {
    Box::new(crate::mock::MockClient::for_endpoint(endpoint))
}
