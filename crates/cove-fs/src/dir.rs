//! Directory handles and enumeration
//!
//! Directory handles hand out further handles by name, remove entries,
//! resolve descendants, and enumerate children through an async cursor.
//! Enumeration is not a snapshot: each cursor step issues one readdir
//! against the server, so concurrent mutations may appear or be missed.

use std::ops::Deref;
use std::sync::Arc;

use cove_smb::{ClientError, ContextGuard, EntryKind, OpenFlags, RawDir, RawDirEntry};
use tracing::debug;

use crate::error::{client_error, Error, NameContext, Result};
use crate::file::SmbFileHandle;
use crate::handle::{HandleKind, SmbHandle};
use crate::path::PathRef;

/// Options for [`SmbDirectoryHandle::get_directory_handle`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GetDirectoryOptions {
    /// Create the directory when it does not exist
    pub create: bool,
}

/// Options for [`SmbDirectoryHandle::get_file_handle`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GetFileOptions {
    /// Create a zero-length file when it does not exist
    pub create: bool,
}

/// Options for [`SmbDirectoryHandle::remove_entry`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Delete directory contents depth-first before the directory
    pub recursive: bool,
}

/// A directory's child, as surfaced by enumeration
#[derive(Debug, Clone)]
pub enum SmbEntry {
    /// A child directory
    Directory(SmbDirectoryHandle),
    /// A child file
    File(SmbFileHandle),
}

impl SmbEntry {
    /// The child's name.
    pub fn name(&self) -> &str {
        self.as_handle().name()
    }

    /// The child's kind.
    pub fn kind(&self) -> HandleKind {
        self.as_handle().kind()
    }

    /// The untyped handle.
    pub fn as_handle(&self) -> &SmbHandle {
        match self {
            Self::Directory(dir) => dir.as_handle(),
            Self::File(file) => file.as_handle(),
        }
    }
}

/// Handle naming a directory
#[derive(Debug, Clone)]
pub struct SmbDirectoryHandle {
    handle: SmbHandle,
}

impl Deref for SmbDirectoryHandle {
    type Target = SmbHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl TryFrom<SmbHandle> for SmbDirectoryHandle {
    type Error = Error;

    fn try_from(handle: SmbHandle) -> Result<Self> {
        match handle.kind() {
            HandleKind::Directory => Ok(Self::from_handle(handle)),
            HandleKind::File => Err(Error::TypeMismatch),
        }
    }
}

impl SmbDirectoryHandle {
    pub(crate) fn from_handle(handle: SmbHandle) -> Self {
        debug_assert_eq!(handle.kind(), HandleKind::Directory);
        Self { handle }
    }

    /// The untyped handle.
    pub fn as_handle(&self) -> &SmbHandle {
        &self.handle
    }

    /// Obtain a handle for the child directory `name`.
    ///
    /// An existing file of that name is a kind mismatch; a missing
    /// entry is created when `options.create` is set and reported as
    /// `Directory "<name>" not found` otherwise.
    pub async fn get_directory_handle(
        &self,
        name: &str,
        options: GetDirectoryOptions,
    ) -> Result<SmbDirectoryHandle> {
        let child = self.path().join(name)?;
        let wire = child.to_share_path();
        match self.ctx().stat(&wire).await {
            Ok(stat) if stat.kind == EntryKind::Directory => Ok(Self::from_handle(
                SmbHandle::new(self.ctx().clone(), child, HandleKind::Directory),
            )),
            Ok(_) => Err(Error::TypeMismatch),
            Err(ClientError::NotFound) => {
                if !options.create {
                    return Err(Error::DirectoryNotFound(name.to_string()));
                }
                self.ctx()
                    .mkdir(&wire)
                    .await
                    .map_err(|e| client_error(e, NameContext::Directory(name)))?;
                debug!(path = %child, "directory created");
                Ok(Self::from_handle(SmbHandle::new(
                    self.ctx().clone(),
                    child,
                    HandleKind::Directory,
                )))
            }
            Err(e) => Err(client_error(e, NameContext::Directory(name))),
        }
    }

    /// Obtain a handle for the child file `name`.
    ///
    /// Symmetric with [`Self::get_directory_handle`]; creation makes a
    /// zero-length file.
    pub async fn get_file_handle(
        &self,
        name: &str,
        options: GetFileOptions,
    ) -> Result<SmbFileHandle> {
        let child = self.path().join(name)?;
        let wire = child.to_share_path();
        match self.ctx().stat(&wire).await {
            Ok(stat) if stat.kind == EntryKind::File => Ok(SmbFileHandle::from_handle(
                SmbHandle::new(self.ctx().clone(), child, HandleKind::File),
            )),
            Ok(_) => Err(Error::TypeMismatch),
            Err(ClientError::NotFound) => {
                if !options.create {
                    return Err(Error::FileNotFound(name.to_string()));
                }
                let fd = self
                    .ctx()
                    .open(&wire, OpenFlags::create())
                    .await
                    .map_err(|e| client_error(e, NameContext::File(name)))?;
                self.ctx().close(fd);
                debug!(path = %child, "file created");
                Ok(SmbFileHandle::from_handle(SmbHandle::new(
                    self.ctx().clone(),
                    child,
                    HandleKind::File,
                )))
            }
            Err(e) => Err(client_error(e, NameContext::File(name))),
        }
    }

    /// Remove the child `name`.
    ///
    /// Files are unlinked; directories are removed, depth-first when
    /// `options.recursive` is set, and with `Directory "<name>" is not
    /// empty` otherwise when populated. A missing child is
    /// `Entry "<name>" not found`.
    pub async fn remove_entry(&self, name: &str, options: RemoveOptions) -> Result<()> {
        let child = self.path().join(name)?;
        let wire = child.to_share_path();
        let stat = self
            .ctx()
            .stat(&wire)
            .await
            .map_err(|e| client_error(e, NameContext::Entry(name)))?;
        match stat.kind {
            EntryKind::File => self
                .ctx()
                .unlink(&wire)
                .await
                .map_err(|e| client_error(e, NameContext::Entry(name))),
            EntryKind::Directory if options.recursive => self.remove_tree(child).await,
            EntryKind::Directory => self
                .ctx()
                .rmdir(&wire)
                .await
                .map_err(|e| client_error(e, NameContext::Directory(name))),
        }
    }

    /// Depth-first removal: delete files while discovering, then remove
    /// the directories children-before-parents.
    async fn remove_tree(&self, root: PathRef) -> Result<()> {
        let ctx = self.ctx();
        let mut stack = vec![root];
        let mut discovered = Vec::new();
        while let Some(dir) = stack.pop() {
            for entry in list_dir(ctx, &dir).await? {
                let child = dir.join(&entry.name)?;
                match entry.kind {
                    EntryKind::File => {
                        ctx.unlink(&child.to_share_path())
                            .await
                            .map_err(|e| client_error(e, NameContext::Entry(&entry.name)))?;
                    }
                    EntryKind::Directory => stack.push(child),
                }
            }
            discovered.push(dir);
        }
        for dir in discovered.iter().rev() {
            let name = dir.name().unwrap_or_default().to_string();
            ctx.rmdir(&dir.to_share_path())
                .await
                .map_err(|e| client_error(e, NameContext::Directory(&name)))?;
        }
        Ok(())
    }

    /// The relative path of `possible_descendant` below this handle, or
    /// `None` when it is not a same-endpoint descendant.
    pub fn resolve(&self, possible_descendant: &SmbHandle) -> Option<Vec<String>> {
        if self.endpoint() != possible_descendant.endpoint() {
            return None;
        }
        self.path().relative_to(possible_descendant.path())
    }

    /// Cursor over `(name, handle)` pairs of the children.
    pub fn entries(&self) -> DirEntries {
        DirEntries::new(self.ctx().clone(), self.path().clone(), self.name().to_string())
    }

    /// Cursor over child names.
    pub fn keys(&self) -> DirKeys {
        DirKeys {
            inner: self.entries(),
        }
    }

    /// Cursor over child handles.
    pub fn values(&self) -> DirValues {
        DirValues {
            inner: self.entries(),
        }
    }
}

/// Collect a directory's children (dot entries filtered).
pub(crate) async fn list_dir(
    ctx: &Arc<ContextGuard>,
    path: &PathRef,
) -> Result<Vec<RawDirEntry>> {
    let dir_name = path.name().unwrap_or_default().to_string();
    let map_err =
        |e: ClientError| client_error(e, NameContext::Directory(&dir_name));
    let dir = ctx.opendir(&path.to_share_path()).await.map_err(map_err)?;
    let mut entries = Vec::new();
    loop {
        match ctx.readdir(dir).await {
            Ok(Some(entry)) => {
                if entry.name != "." && entry.name != ".." {
                    entries.push(entry);
                }
            }
            Ok(None) => break,
            Err(e) => {
                ctx.closedir(dir);
                return Err(map_err(e));
            }
        }
    }
    ctx.closedir(dir);
    Ok(entries)
}

/// Async cursor over a directory's `(name, handle)` pairs
///
/// The server-side cursor opens on the first step and closes on
/// exhaustion, error, or drop. Each step issues exactly one readdir.
#[derive(Debug)]
pub struct DirEntries {
    ctx: Arc<ContextGuard>,
    base: PathRef,
    dir_name: String,
    dir: Option<RawDir>,
    done: bool,
}

impl DirEntries {
    fn new(ctx: Arc<ContextGuard>, base: PathRef, dir_name: String) -> Self {
        Self {
            ctx,
            base,
            dir_name,
            dir: None,
            done: false,
        }
    }

    /// The next child, or `None` once the listing is exhausted.
    pub async fn next_entry(&mut self) -> Result<Option<(String, SmbEntry)>> {
        if self.done {
            return Ok(None);
        }
        if self.dir.is_none() {
            match self.ctx.opendir(&self.base.to_share_path()).await {
                Ok(dir) => self.dir = Some(dir),
                Err(e) => {
                    self.done = true;
                    return Err(client_error(e, NameContext::Directory(&self.dir_name)));
                }
            }
        }
        let dir = self.dir.expect("opened above");
        loop {
            match self.ctx.readdir(dir).await {
                Ok(Some(entry)) => {
                    if entry.name == "." || entry.name == ".." {
                        continue;
                    }
                    let child = match self.base.join(&entry.name) {
                        Ok(child) => child,
                        Err(e) => {
                            self.finish();
                            return Err(e);
                        }
                    };
                    let handle = SmbHandle::new(self.ctx.clone(), child, entry.kind.into());
                    let value = match entry.kind {
                        EntryKind::Directory => {
                            SmbEntry::Directory(SmbDirectoryHandle::from_handle(handle))
                        }
                        EntryKind::File => SmbEntry::File(SmbFileHandle::from_handle(handle)),
                    };
                    return Ok(Some((entry.name, value)));
                }
                Ok(None) => {
                    self.finish();
                    return Ok(None);
                }
                Err(e) => {
                    self.finish();
                    return Err(client_error(e, NameContext::Directory(&self.dir_name)));
                }
            }
        }
    }

    fn finish(&mut self) {
        if let Some(dir) = self.dir.take() {
            self.ctx.closedir(dir);
        }
        self.done = true;
    }
}

impl Drop for DirEntries {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Async cursor over child names
#[derive(Debug)]
pub struct DirKeys {
    inner: DirEntries,
}

impl DirKeys {
    /// The next child name, or `None` once exhausted.
    pub async fn next_key(&mut self) -> Result<Option<String>> {
        Ok(self.inner.next_entry().await?.map(|(name, _)| name))
    }
}

/// Async cursor over child handles
#[derive(Debug)]
pub struct DirValues {
    inner: DirEntries,
}

impl DirValues {
    /// The next child handle, or `None` once exhausted.
    pub async fn next_value(&mut self) -> Result<Option<SmbEntry>> {
        Ok(self.inner.next_entry().await?.map(|(_, entry)| entry))
    }
}
