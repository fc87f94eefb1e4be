//! The request broker
//!
//! [`SmbContext`] is the asynchronous face of one live session. Every
//! method builds a command, enqueues it on the context's driver thread,
//! and suspends on the completion. Submissions enter a FIFO per
//! context; completions of *distinct* operations are unordered from the
//! caller's point of view, so sequencing is done the obvious way — by
//! awaiting.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::client::{
    ClientFactory, EntryKind, OpenFlags, RawDir, RawDirEntry, RawFd, RawStat,
};
use crate::config::SmbConfig;
use crate::driver::{Command, DriverHandle, Reply};
use crate::endpoint::SmbEndpoint;
use crate::error::{ClientError, Result};

/// A live SMB session attached to an endpoint
#[derive(Debug)]
pub struct SmbContext {
    endpoint: Arc<SmbEndpoint>,
    driver: DriverHandle,
    read_chunk: u64,
    write_chunk: u64,
    watch_interval: std::time::Duration,
}

impl SmbContext {
    /// Connect a fresh context.
    ///
    /// The backend's connect runs on the new driver thread; this
    /// resolves when the share handshake is done.
    pub async fn connect(
        endpoint: SmbEndpoint,
        config: &SmbConfig,
        factory: ClientFactory,
    ) -> Result<Arc<Self>> {
        let (driver, max_io) = DriverHandle::connect(endpoint.clone(), factory).await?;
        Ok(Arc::new(Self {
            endpoint: Arc::new(endpoint),
            driver,
            read_chunk: config.max_read_size.min(max_io),
            write_chunk: config.max_write_size.min(max_io),
            watch_interval: config.watch_interval,
        }))
    }

    /// The endpoint this context serves
    pub fn endpoint(&self) -> &Arc<SmbEndpoint> {
        &self.endpoint
    }

    /// Effective per-request read ceiling (config clamped by server)
    pub fn read_chunk(&self) -> u64 {
        self.read_chunk
    }

    /// Effective per-request write ceiling (config clamped by server)
    pub fn write_chunk(&self) -> u64 {
        self.write_chunk
    }

    /// Polling cadence configured for directory watchers
    pub fn watch_interval(&self) -> std::time::Duration {
        self.watch_interval
    }

    /// Stop the driver thread. Outstanding futures resolve with
    /// [`ClientError::ContextClosed`].
    pub fn shutdown(&self) {
        self.driver.shutdown();
    }

    async fn submit<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.driver.send(build(tx))?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ContextClosed),
        }
    }

    /// Stat an entry by share-relative path.
    pub async fn stat(&self, path: &str) -> Result<RawStat> {
        let path = path.to_string();
        self.submit(|reply| Command::Stat { path, reply }).await
    }

    /// Open a file.
    pub async fn open(&self, path: &str, flags: OpenFlags) -> Result<RawFd> {
        let path = path.to_string();
        self.submit(|reply| Command::Open { path, flags, reply })
            .await
    }

    /// Close an open file (fire-and-forget).
    pub fn close(&self, fd: RawFd) {
        let _ = self.driver.send(Command::Close { fd });
    }

    /// Stat an open file.
    pub async fn fstat(&self, fd: RawFd) -> Result<RawStat> {
        self.submit(|reply| Command::Fstat { fd, reply }).await
    }

    /// Read up to `len` bytes at `offset`.
    pub async fn pread(&self, fd: RawFd, offset: u64, len: u32) -> Result<Bytes> {
        self.submit(|reply| Command::Pread {
            fd,
            offset,
            len,
            reply,
        })
        .await
    }

    /// Write `data` at `offset`.
    pub async fn pwrite(&self, fd: RawFd, offset: u64, data: Bytes) -> Result<u32> {
        self.submit(|reply| Command::Pwrite {
            fd,
            offset,
            data,
            reply,
        })
        .await
    }

    /// Set an open file's length.
    pub async fn ftruncate(&self, fd: RawFd, len: u64) -> Result<()> {
        self.submit(|reply| Command::Ftruncate { fd, len, reply })
            .await
    }

    /// Flush an open file.
    pub async fn fsync(&self, fd: RawFd) -> Result<()> {
        self.submit(|reply| Command::Fsync { fd, reply }).await
    }

    /// Begin a directory enumeration.
    pub async fn opendir(&self, path: &str) -> Result<RawDir> {
        let path = path.to_string();
        self.submit(|reply| Command::Opendir { path, reply }).await
    }

    /// One enumeration step.
    pub async fn readdir(&self, dir: RawDir) -> Result<Option<RawDirEntry>> {
        self.submit(|reply| Command::Readdir { dir, reply }).await
    }

    /// Release an enumeration handle (fire-and-forget).
    pub fn closedir(&self, dir: RawDir) {
        let _ = self.driver.send(Command::Closedir { dir });
    }

    /// Create a directory.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.submit(|reply| Command::Mkdir { path, reply }).await
    }

    /// Remove an empty directory.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.submit(|reply| Command::Rmdir { path, reply }).await
    }

    /// Remove a file.
    pub async fn unlink(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.submit(|reply| Command::Unlink { path, reply }).await
    }

    /// Side-effect-free writability probe for the permission gate.
    pub async fn write_probe(&self, path: &str, kind: EntryKind) -> Result<bool> {
        let path = path.to_string();
        self.submit(|reply| Command::WriteProbe { path, kind, reply })
            .await
    }
}
