//! The writable stream
//!
//! A [`WritableStream`] owns one server-side open for its whole
//! lifetime and tracks `{size, cursor, locked, closed, aborted}`
//! locally. Writes are chunked at the effective write ceiling and
//! submitted sequentially; a partial failure rolls size and cursor
//! forward only past the ranges that were committed.
//!
//! ```text
//!      createWritable
//! (∅) ─────────────▶ Open ──write/seek/truncate──▶ Open
//!                     │
//!                     ├── getWriter ──▶ Locked ──releaseLock──▶ Open
//!                     │                  │
//!                     │                  └── close ──▶ Closed (terminal)
//!                     │
//!                     ├── close ──▶ Closed (terminal)
//!                     └── abort ──▶ Aborted (terminal)
//! ```

use std::sync::Arc;

use bytes::Bytes;
use cove_smb::{OpenFlags, RawFd};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{client_error, Error, NameContext, Result};
use crate::file::Blob;
use crate::handle::SmbHandle;

/// Options for [`SmbFileHandle::create_writable`](crate::SmbFileHandle::create_writable)
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateWritableOptions {
    /// Keep the current contents instead of truncating to zero
    pub keep_existing_data: bool,
}

/// How the stream's open was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Contents were discarded at open
    Truncate,
    /// Contents were preserved at open
    Keep,
}

/// Bytes-bearing input to a write
#[derive(Debug, Clone)]
pub enum WritePayload {
    /// A byte buffer (buffers, typed-array views, and data views all
    /// land here once a binding has flattened them)
    Buffer(Bytes),
    /// Text, written as UTF-8
    Text(String),
    /// A byte blob view; its bytes are fetched when the write runs
    Blob(Blob),
}

impl WritePayload {
    async fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Buffer(bytes) => Ok(bytes),
            Self::Text(text) => Ok(Bytes::from(text.into_bytes())),
            Self::Blob(blob) => blob.array_buffer().await,
        }
    }
}

impl From<Bytes> for WritePayload {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}

impl From<Vec<u8>> for WritePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffer(Bytes::from(bytes))
    }
}

impl From<&[u8]> for WritePayload {
    fn from(bytes: &[u8]) -> Self {
        Self::Buffer(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for WritePayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for WritePayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Blob> for WritePayload {
    fn from(blob: Blob) -> Self {
        Self::Blob(blob)
    }
}

/// One structured stream command
///
/// This is the seam a File System Access binding targets: raw payloads
/// become `Write` at the cursor, and `{type: …}` objects become the
/// matching variant via [`WriteCommand::parse`].
#[derive(Debug, Clone)]
pub enum WriteCommand {
    /// Write bytes at `position` (cursor when absent)
    Write {
        /// The bytes to write
        data: WritePayload,
        /// Absolute offset; the cursor when absent
        position: Option<u64>,
    },
    /// Move the cursor without touching the file
    Seek {
        /// New cursor position; may exceed the current size
        position: u64,
    },
    /// Set the file length exactly
    Truncate {
        /// New size in bytes
        size: u64,
    },
}

impl WriteCommand {
    /// Assemble a command from the parts of a structured write object.
    ///
    /// Unknown `kind` strings fail with `Writing unsupported type`; a
    /// `write` without usable data, or `seek`/`truncate` without their
    /// number, fail with `Writing unsupported data type`.
    pub fn parse(
        kind: &str,
        data: Option<WritePayload>,
        position: Option<u64>,
        size: Option<u64>,
    ) -> Result<Self> {
        match kind {
            "write" => Ok(Self::Write {
                data: data.ok_or(Error::UnsupportedDataType)?,
                position,
            }),
            "seek" => Ok(Self::Seek {
                position: position.ok_or(Error::UnsupportedDataType)?,
            }),
            "truncate" => Ok(Self::Truncate {
                size: size.ok_or(Error::UnsupportedDataType)?,
            }),
            _ => Err(Error::UnsupportedType),
        }
    }
}

impl From<WritePayload> for WriteCommand {
    fn from(data: WritePayload) -> Self {
        Self::Write {
            data,
            position: None,
        }
    }
}

impl From<Bytes> for WriteCommand {
    fn from(bytes: Bytes) -> Self {
        WritePayload::from(bytes).into()
    }
}

impl From<Vec<u8>> for WriteCommand {
    fn from(bytes: Vec<u8>) -> Self {
        WritePayload::from(bytes).into()
    }
}

impl From<&[u8]> for WriteCommand {
    fn from(bytes: &[u8]) -> Self {
        WritePayload::from(bytes).into()
    }
}

impl From<&str> for WriteCommand {
    fn from(text: &str) -> Self {
        WritePayload::from(text).into()
    }
}

impl From<String> for WriteCommand {
    fn from(text: String) -> Self {
        WritePayload::from(text).into()
    }
}

impl From<Blob> for WriteCommand {
    fn from(blob: Blob) -> Self {
        WritePayload::from(blob).into()
    }
}

#[derive(Debug)]
struct StreamState {
    size: u64,
    cursor: u64,
    locked: bool,
    closed: bool,
    aborted: bool,
}

#[derive(Debug)]
struct StreamInner {
    handle: SmbHandle,
    fd: RawFd,
    chunk: u64,
    mode: WriteMode,
    state: Mutex<StreamState>,
}

/// Writable stream over one file
#[derive(Debug)]
pub struct WritableStream {
    inner: Arc<StreamInner>,
}

/// Exclusive single-holder writer over a stream
///
/// Obtained with [`WritableStream::get_writer`]; holds the stream's
/// lock until [`StreamWriter::release_lock`] or drop.
#[derive(Debug)]
pub struct StreamWriter {
    inner: Arc<StreamInner>,
    released: bool,
}

impl WritableStream {
    pub(crate) async fn open(
        handle: SmbHandle,
        options: CreateWritableOptions,
    ) -> Result<Self> {
        let ctx = handle.ctx().clone();
        let path = handle.path().to_share_path();
        let (flags, mode) = if options.keep_existing_data {
            (OpenFlags::write_keep(), WriteMode::Keep)
        } else {
            (OpenFlags::write_truncate(), WriteMode::Truncate)
        };
        let fd = ctx
            .open(&path, flags)
            .await
            .map_err(|e| client_error(e, NameContext::File(handle.name())))?;
        let size = if options.keep_existing_data {
            match ctx.fstat(fd).await {
                Ok(stat) => stat.size,
                Err(e) => {
                    ctx.close(fd);
                    return Err(client_error(e, NameContext::File(handle.name())));
                }
            }
        } else {
            0
        };
        debug!(path = %handle.path(), ?mode, size, "writable stream opened");
        Ok(Self {
            inner: Arc::new(StreamInner {
                chunk: ctx.write_chunk(),
                handle,
                fd,
                mode,
                state: Mutex::new(StreamState {
                    size,
                    cursor: 0,
                    locked: false,
                    closed: false,
                    aborted: false,
                }),
            }),
        })
    }

    /// How the stream's open treated existing contents.
    pub fn mode(&self) -> WriteMode {
        self.inner.mode
    }

    /// Current tracked size.
    pub async fn size(&self) -> u64 {
        self.inner.state.lock().await.size
    }

    /// Current cursor position.
    pub async fn cursor(&self) -> u64 {
        self.inner.state.lock().await.cursor
    }

    /// Whether a writer currently holds the stream.
    pub async fn locked(&self) -> bool {
        self.inner.state.lock().await.locked
    }

    /// Apply one write input: raw bytes/text (written at the cursor) or
    /// a structured [`WriteCommand`].
    pub async fn write(&self, input: impl Into<WriteCommand>) -> Result<()> {
        self.inner.apply(input.into(), false).await
    }

    /// Move the cursor; positions beyond the size are sparse intent,
    /// realized as zero-fill by the next write.
    pub async fn seek(&self, position: u64) -> Result<()> {
        self.inner.apply(WriteCommand::Seek { position }, false).await
    }

    /// Set the size exactly, zero-filling growth and clamping the
    /// cursor on shrink.
    pub async fn truncate(&self, size: u64) -> Result<()> {
        self.inner.apply(WriteCommand::Truncate { size }, false).await
    }

    /// Flush and close the underlying open; the stream becomes
    /// terminally closed.
    pub async fn close(&self) -> Result<()> {
        self.inner.close(false).await
    }

    /// Discard pending work and close without flushing; returns the
    /// reason for symmetry with the web API.
    pub async fn abort(&self, reason: impl Into<String>) -> Result<String> {
        self.inner.abort(reason.into(), false).await
    }

    /// Take the exclusive writer.
    ///
    /// Fails with `Invalid state: WritableStream is locked` while
    /// another writer is attached.
    pub async fn get_writer(&self) -> Result<StreamWriter> {
        let mut state = self.inner.state.lock().await;
        if state.closed || state.aborted {
            return Err(Error::stream_closed());
        }
        if state.locked {
            return Err(Error::stream_locked());
        }
        state.locked = true;
        Ok(StreamWriter {
            inner: self.inner.clone(),
            released: false,
        })
    }
}

impl StreamWriter {
    /// Write through the lock.
    pub async fn write(&self, input: impl Into<WriteCommand>) -> Result<()> {
        self.inner.apply(input.into(), true).await
    }

    /// Seek through the lock.
    pub async fn seek(&self, position: u64) -> Result<()> {
        self.inner.apply(WriteCommand::Seek { position }, true).await
    }

    /// Truncate through the lock.
    pub async fn truncate(&self, size: u64) -> Result<()> {
        self.inner.apply(WriteCommand::Truncate { size }, true).await
    }

    /// Close the stream through the lock.
    pub async fn close(&self) -> Result<()> {
        self.inner.close(true).await
    }

    /// Abort the stream through the lock.
    pub async fn abort(&self, reason: impl Into<String>) -> Result<String> {
        self.inner.abort(reason.into(), true).await
    }

    /// Give the lock back, returning the stream to plain use.
    pub async fn release_lock(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.state.lock().await.locked = false;
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.released {
            if let Ok(mut state) = self.inner.state.try_lock() {
                state.locked = false;
            }
        }
    }
}

impl StreamInner {
    async fn apply(&self, command: WriteCommand, via_writer: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed || state.aborted {
            return Err(Error::stream_closed());
        }
        if state.locked && !via_writer {
            return Err(Error::stream_locked());
        }
        match command {
            WriteCommand::Seek { position } => {
                state.cursor = position;
                Ok(())
            }
            WriteCommand::Truncate { size } => {
                let old_size = state.size;
                self.ftruncate(size).await?;
                state.size = size;
                // Clamp a cursor past the new end; a cursor that sat at
                // the old end keeps tracking EOF.
                if state.cursor > size || state.cursor == old_size {
                    state.cursor = size;
                }
                Ok(())
            }
            WriteCommand::Write { data, position } => {
                let bytes = data.into_bytes().await?;
                let pos = position.unwrap_or(state.cursor);
                if pos > state.size {
                    // Zero-fill the gap [size, pos) before the payload.
                    self.ftruncate(pos).await?;
                    state.size = pos;
                }
                let total = bytes.len() as u64;
                let mut committed = 0u64;
                while committed < total {
                    let end = (committed + self.chunk).min(total);
                    let part = bytes.slice(committed as usize..end as usize);
                    let wrote = self
                        .handle
                        .ctx()
                        .pwrite(self.fd, pos + committed, part)
                        .await;
                    match wrote {
                        Ok(n) if n > 0 => committed += n as u64,
                        Ok(_) => {
                            Self::roll_forward(&mut state, pos, committed);
                            return Err(Error::Io("short write".to_string()));
                        }
                        Err(e) => {
                            Self::roll_forward(&mut state, pos, committed);
                            return Err(client_error(
                                e,
                                NameContext::File(self.handle.name()),
                            ));
                        }
                    }
                }
                Self::roll_forward(&mut state, pos, total);
                Ok(())
            }
        }
    }

    /// Advance cursor and size past the committed range only.
    fn roll_forward(state: &mut StreamState, pos: u64, committed: u64) {
        state.cursor = pos + committed;
        state.size = state.size.max(state.cursor);
    }

    async fn ftruncate(&self, size: u64) -> Result<()> {
        self.handle
            .ctx()
            .ftruncate(self.fd, size)
            .await
            .map_err(|e| client_error(e, NameContext::File(self.handle.name())))
    }

    async fn close(&self, via_writer: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed || state.aborted {
            return Err(Error::stream_closed());
        }
        if state.locked && !via_writer {
            return Err(Error::stream_locked());
        }
        self.handle
            .ctx()
            .fsync(self.fd)
            .await
            .map_err(|e| client_error(e, NameContext::File(self.handle.name())))?;
        self.handle.ctx().close(self.fd);
        state.closed = true;
        debug!(path = %self.handle.path(), "writable stream closed");
        Ok(())
    }

    async fn abort(&self, reason: String, via_writer: bool) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.closed || state.aborted {
            return Err(Error::stream_closed());
        }
        if state.locked && !via_writer {
            return Err(Error::stream_locked());
        }
        self.handle.ctx().close(self.fd);
        state.aborted = true;
        debug!(path = %self.handle.path(), %reason, "writable stream aborted");
        Ok(reason)
    }
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        // A stream dropped without close/abort still releases its open.
        if let Ok(state) = self.state.try_lock() {
            if !state.closed && !state.aborted {
                self.handle.ctx().close(self.fd);
            }
        }
    }
}
