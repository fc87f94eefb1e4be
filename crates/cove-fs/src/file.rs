//! The file read path
//!
//! [`SmbFileHandle::get_file`] snapshots name/size/type/mtime into an
//! [`SmbFile`]. Reads go through a transient server-side open and are
//! chunked at the effective read ceiling (8 MiB against stock servers);
//! [`ByteStream`] exposes exactly those chunks, which makes streaming
//! behavior reproducible.

use std::ops::Deref;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use cove_smb::{OpenFlags, RawFd};
use tracing::trace;

use crate::error::{client_error, Error, NameContext, Result};
use crate::handle::{HandleKind, SmbHandle};
use crate::write::{CreateWritableOptions, WritableStream};

/// MIME type reported when the extension table has no answer.
const MIME_UNKNOWN: &str = "unknown";

/// Handle naming a file
#[derive(Debug, Clone)]
pub struct SmbFileHandle {
    handle: SmbHandle,
}

impl Deref for SmbFileHandle {
    type Target = SmbHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl SmbFileHandle {
    pub(crate) fn from_handle(handle: SmbHandle) -> Self {
        debug_assert_eq!(handle.kind(), HandleKind::File);
        Self { handle }
    }

    /// The untyped handle.
    pub fn as_handle(&self) -> &SmbHandle {
        &self.handle
    }

    /// Snapshot the file into a readable record.
    ///
    /// Size and times come from a fresh stat; the MIME type comes from
    /// the extension table alone, `"unknown"` when it has no opinion.
    pub async fn get_file(&self) -> Result<SmbFile> {
        let stat = self
            .handle
            .ctx()
            .stat(&self.handle.path().to_share_path())
            .await
            .map_err(|e| client_error(e, NameContext::File(self.name())))?;
        if stat.kind == cove_smb::EntryKind::Directory {
            return Err(Error::TypeMismatch);
        }
        let mime = mime_guess::from_path(Path::new(self.name()))
            .first_raw()
            .unwrap_or(MIME_UNKNOWN)
            .to_string();
        Ok(SmbFile {
            handle: self.handle.clone(),
            name: self.name().to_string(),
            size: stat.size,
            mime,
            last_modified: (stat.mtime as i64) * 1000 + (stat.mtime_nsec as i64) / 1_000_000,
        })
    }

    /// Open a writable stream over this file.
    pub async fn create_writable(
        &self,
        options: CreateWritableOptions,
    ) -> Result<WritableStream> {
        WritableStream::open(self.handle.clone(), options).await
    }
}

impl TryFrom<SmbHandle> for SmbFileHandle {
    type Error = Error;

    fn try_from(handle: SmbHandle) -> Result<Self> {
        match handle.kind() {
            HandleKind::File => Ok(Self::from_handle(handle)),
            HandleKind::Directory => Err(Error::TypeMismatch),
        }
    }
}

/// Readable snapshot of a file
///
/// Size and modification time are fixed at [`SmbFileHandle::get_file`]
/// time; the bytes are fetched lazily per read call.
#[derive(Debug, Clone)]
pub struct SmbFile {
    handle: SmbHandle,
    name: String,
    size: u64,
    mime: String,
    last_modified: i64,
}

impl SmbFile {
    /// File name (last path segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes at snapshot time.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// MIME type inferred from the extension, or `"unknown"`.
    pub fn mime_type(&self) -> &str {
        &self.mime
    }

    /// Last modification time, epoch ms.
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// The whole contents as one buffer.
    ///
    /// Internally chunked at the read ceiling and issued sequentially
    /// from offset 0.
    pub async fn array_buffer(&self) -> Result<Bytes> {
        read_range(&self.handle, 0, self.size).await
    }

    /// The contents decoded as UTF-8 (lossily).
    pub async fn text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.array_buffer().await?).into_owned())
    }

    /// A byte-range view.
    ///
    /// Negative indices count back from the end; everything is clamped
    /// to `[0, size)`. The blob reads independently through the same
    /// chunked path, starting at its own offset.
    pub fn slice(
        &self,
        start: Option<i64>,
        end: Option<i64>,
        content_type: Option<&str>,
    ) -> Blob {
        let start = clamp_index(start, self.size, 0);
        let end = clamp_index(end, self.size, self.size).max(start);
        Blob {
            handle: self.handle.clone(),
            start,
            end,
            content_type: content_type.unwrap_or_default().to_string(),
        }
    }

    /// A lazy, finite, non-restartable chunk sequence over the whole
    /// file. Each chunk is `min(read ceiling, remaining)` bytes.
    pub fn stream(&self) -> ByteStream {
        ByteStream::new(self.handle.clone(), 0, None)
    }
}

/// Byte-range view over a file
#[derive(Debug, Clone)]
pub struct Blob {
    handle: SmbHandle,
    start: u64,
    end: u64,
    content_type: String,
}

impl Blob {
    /// View length in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Content type given at slice time (empty when none was).
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The viewed bytes as one buffer.
    pub async fn array_buffer(&self) -> Result<Bytes> {
        read_range(&self.handle, self.start, self.size()).await
    }

    /// The viewed bytes decoded as UTF-8 (lossily).
    pub async fn text(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.array_buffer().await?).into_owned())
    }

    /// A sub-view, with indices relative to this view.
    pub fn slice(&self, start: Option<i64>, end: Option<i64>, content_type: Option<&str>) -> Blob {
        let len = self.size();
        let rel_start = clamp_index(start, len, 0);
        let rel_end = clamp_index(end, len, len).max(rel_start);
        Blob {
            handle: self.handle.clone(),
            start: self.start + rel_start,
            end: self.start + rel_end,
            content_type: content_type.unwrap_or_default().to_string(),
        }
    }

    /// Chunked stream over the viewed range.
    pub fn stream(&self) -> ByteStream {
        ByteStream::new(self.handle.clone(), self.start, Some(self.end))
    }
}

/// Lazy chunk sequence over an open file
///
/// The server-side open happens on the first pull and is closed on
/// exhaustion, cancellation, error, or drop. The sequence is finite and
/// cannot be restarted.
#[derive(Debug)]
pub struct ByteStream {
    handle: SmbHandle,
    fd: Option<RawFd>,
    start: u64,
    bound: Option<u64>,
    offset: u64,
    end: u64,
    done: bool,
}

impl ByteStream {
    fn new(handle: SmbHandle, start: u64, bound: Option<u64>) -> Self {
        Self {
            handle,
            fd: None,
            start,
            bound,
            offset: 0,
            end: 0,
            done: false,
        }
    }

    /// Pull the next chunk; `None` once the range is exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let ctx = self.handle.ctx().clone();
        let name_err =
            |handle: &SmbHandle, e| client_error(e, NameContext::File(handle.name()));

        if self.fd.is_none() {
            let path = self.handle.path().to_share_path();
            let fd = ctx
                .open(&path, OpenFlags::read())
                .await
                .map_err(|e| name_err(&self.handle, e))?;
            let stat = match ctx.fstat(fd).await {
                Ok(stat) => stat,
                Err(e) => {
                    ctx.close(fd);
                    self.done = true;
                    return Err(name_err(&self.handle, e));
                }
            };
            self.fd = Some(fd);
            self.offset = self.start.min(stat.size);
            self.end = self.bound.map_or(stat.size, |b| b.min(stat.size));
        }

        let fd = self.fd.expect("opened above");
        let remaining = self.end.saturating_sub(self.offset);
        if remaining == 0 {
            self.finish();
            return Ok(None);
        }
        let want = remaining.min(ctx.read_chunk()) as u32;
        let bytes = match ctx.pread(fd, self.offset, want).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.finish();
                return Err(name_err(&self.handle, e));
            }
        };
        if bytes.is_empty() {
            // The file shrank under us; the stream just ends early.
            trace!(path = %self.handle.path(), "stream hit early EOF");
            self.finish();
            return Ok(None);
        }
        self.offset += bytes.len() as u64;
        if self.offset >= self.end {
            self.finish();
        }
        Ok(Some(bytes))
    }

    /// Stop early and release the underlying open.
    pub fn cancel(&mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(fd) = self.fd.take() {
            self.handle.ctx().close(fd);
        }
        self.done = true;
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Resolve an optional possibly-negative index against `max`.
fn clamp_index(pos: Option<i64>, max: u64, default: u64) -> u64 {
    match pos {
        None => default,
        Some(p) => {
            let max = max as i64;
            let resolved = if p < 0 { (p + max).max(0) } else { p.min(max) };
            resolved as u64
        }
    }
}

/// Read `[offset, offset + len)` through a transient open, chunked at
/// the context's read ceiling, sequential, ordered.
async fn read_range(handle: &SmbHandle, offset: u64, len: u64) -> Result<Bytes> {
    let ctx = handle.ctx().clone();
    let path = handle.path().to_share_path();
    let fd = ctx
        .open(&path, OpenFlags::read())
        .await
        .map_err(|e| client_error(e, NameContext::File(handle.name())))?;
    let result = read_loop(ctx.context(), fd, offset, len).await;
    ctx.close(fd);
    result.map_err(|e| client_error(e, NameContext::File(handle.name())))
}

async fn read_loop(
    ctx: &cove_smb::SmbContext,
    fd: RawFd,
    offset: u64,
    len: u64,
) -> cove_smb::Result<Bytes> {
    let chunk = ctx.read_chunk();
    let mut buf = BytesMut::with_capacity(len.min(chunk) as usize);
    let mut pos = offset;
    let end = offset + len;
    while pos < end {
        let want = (end - pos).min(chunk) as u32;
        let bytes = ctx.pread(fd, pos, want).await?;
        if bytes.is_empty() {
            break;
        }
        pos += bytes.len() as u64;
        buf.extend_from_slice(&bytes);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_index() {
        // Mirrors browser Blob.slice index resolution.
        assert_eq!(clamp_index(None, 100, 0), 0);
        assert_eq!(clamp_index(None, 100, 100), 100);
        assert_eq!(clamp_index(Some(12), 100, 0), 12);
        assert_eq!(clamp_index(Some(150), 100, 0), 100);
        assert_eq!(clamp_index(Some(-30), 100, 0), 70);
        assert_eq!(clamp_index(Some(-150), 100, 0), 0);
    }
}
