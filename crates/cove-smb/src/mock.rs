//! In-memory mock backend
//!
//! A [`ShareClient`] over a process-local share tree, used by the test
//! suites and selected by the reference harness through
//! `TEST_USING_MOCKS`. Shares live in a process-wide registry keyed by
//! (server, port, share) so that independent contexts — a watcher's own
//! connection, a second handle to the same URL — observe one tree, the
//! way independent sessions against a real server would.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

use crate::client::{EntryKind, OpenFlags, RawDir, RawDirEntry, RawFd, RawStat, ShareClient};
use crate::endpoint::SmbEndpoint;
use crate::error::{ClientError, Result};

/// Samba's default server-side request ceiling.
const MAX_IO: u64 = 8 * 1024 * 1024;

/// Epoch base for the mock's logical clock.
const CLOCK_BASE: u64 = 1_658_159_058;

type ShareKey = (String, u16, String);

fn registry() -> &'static DashMap<ShareKey, Arc<MockShare>> {
    static REGISTRY: OnceLock<DashMap<ShareKey, Arc<MockShare>>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

#[derive(Debug, Clone)]
struct MockFile {
    data: Vec<u8>,
    mtime: u64,
}

#[derive(Debug)]
struct MockTree {
    /// Directory paths; the share root `""` is always present.
    dirs: BTreeSet<String>,
    files: BTreeMap<String, MockFile>,
    /// Entries the mock ACL marks unwritable.
    read_only: BTreeSet<String>,
    /// Logical clock driving mtimes; one tick per mutation.
    clock: u64,
}

impl MockTree {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// One share's worth of in-memory state, shared by every mock client
/// connected to the same (server, port, share).
#[derive(Debug)]
pub struct MockShare {
    tree: RwLock<MockTree>,
    offline: AtomicBool,
}

impl MockShare {
    /// An empty share: just the root directory.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            tree: RwLock::new(MockTree {
                dirs: BTreeSet::from(["".to_string()]),
                files: BTreeMap::new(),
                read_only: BTreeSet::new(),
                clock: CLOCK_BASE,
            }),
            offline: AtomicBool::new(false),
        })
    }

    /// A share pre-seeded with the reference fixture: `annar` (the
    /// 123-byte sentence), empty file `3`, `first/comment` and
    /// `quatre/points`.
    pub fn with_fixture() -> Arc<Self> {
        let share = Self::empty();
        {
            let mut tree = share.tree.write();
            tree.dirs.insert("first".to_string());
            tree.dirs.insert("quatre".to_string());
            let mtime = tree.clock;
            tree.files.insert(
                "annar".to_string(),
                MockFile {
                    data: b"In order to make sure that this file is exactly 123 bytes \
                            in size, I have written this text while watching its chars count."
                        .to_vec(),
                    mtime,
                },
            );
            for path in ["3", "first/comment", "quatre/points"] {
                tree.files.insert(
                    path.to_string(),
                    MockFile {
                        data: Vec::new(),
                        mtime,
                    },
                );
            }
        }
        share
    }

    /// The registry entry for an endpoint, created with the fixture on
    /// first use.
    pub fn for_endpoint(endpoint: &SmbEndpoint) -> Arc<Self> {
        let key = (
            endpoint.server.clone(),
            endpoint.port,
            endpoint.share.clone(),
        );
        registry()
            .entry(key)
            .or_insert_with(Self::with_fixture)
            .clone()
    }

    /// Drop an endpoint's registry entry (test isolation).
    pub fn evict(endpoint: &SmbEndpoint) {
        registry().remove(&(
            endpoint.server.clone(),
            endpoint.port,
            endpoint.share.clone(),
        ));
    }

    /// Make every connect attempt fail, as an unreachable server would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Mark an entry read-only for the mock ACL probe.
    pub fn mark_read_only(&self, path: &str) {
        self.tree.write().read_only.insert(path.to_string());
    }

    /// Install a file with the given contents.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        let mut tree = self.tree.write();
        let mtime = tree.tick();
        tree.files.insert(
            path.to_string(),
            MockFile {
                data: data.to_vec(),
                mtime,
            },
        );
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn stat_record(kind: EntryKind, size: u64, mtime: u64) -> RawStat {
    RawStat {
        inode: 0,
        size,
        kind,
        atime: mtime,
        mtime,
        ctime: mtime,
        btime: CLOCK_BASE,
        ..RawStat::default()
    }
}

/// Mock [`ShareClient`] over a [`MockShare`]
#[derive(Debug)]
pub struct MockClient {
    share: Arc<MockShare>,
    connected: bool,
    next_id: u64,
    open_files: HashMap<u64, String>,
    open_dirs: HashMap<u64, DirCursor>,
}

#[derive(Debug)]
struct DirCursor {
    entries: Vec<RawDirEntry>,
    index: usize,
}

impl MockClient {
    /// A client over an explicit share (test seam).
    pub fn with_share(share: Arc<MockShare>) -> Self {
        Self {
            share,
            connected: false,
            next_id: 1,
            open_files: HashMap::new(),
            open_dirs: HashMap::new(),
        }
    }

    /// A client over the registry share for the endpoint.
    pub fn for_endpoint(endpoint: &SmbEndpoint) -> Self {
        Self::with_share(MockShare::for_endpoint(endpoint))
    }

    fn file_path(&self, fd: RawFd) -> Result<String> {
        self.open_files
            .get(&fd.0)
            .cloned()
            .ok_or_else(|| ClientError::Io("bad file handle".to_string()))
    }
}

impl ShareClient for MockClient {
    fn connect(&mut self, endpoint: &SmbEndpoint) -> Result<()> {
        if self.share.offline.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectFailed(format!(
                "{endpoint}: connection refused"
            )));
        }
        trace!(%endpoint, "mock connect");
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.open_files.clear();
        self.open_dirs.clear();
    }

    fn max_io_size(&self) -> u64 {
        MAX_IO
    }

    fn stat(&mut self, path: &str) -> Result<RawStat> {
        let tree = self.share.tree.read();
        if tree.dirs.contains(path) {
            return Ok(stat_record(EntryKind::Directory, 0, CLOCK_BASE));
        }
        match tree.files.get(path) {
            Some(file) => Ok(stat_record(
                EntryKind::File,
                file.data.len() as u64,
                file.mtime,
            )),
            None => Err(ClientError::NotFound),
        }
    }

    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<RawFd> {
        let mut tree = self.share.tree.write();
        if tree.dirs.contains(path) {
            return Err(ClientError::IsDirectory);
        }
        if !tree.files.contains_key(path) {
            if !flags.create {
                return Err(ClientError::NotFound);
            }
            if !tree.dirs.contains(parent_of(path)) {
                return Err(ClientError::NotFound);
            }
            let mtime = tree.tick();
            tree.files.insert(
                path.to_string(),
                MockFile {
                    data: Vec::new(),
                    mtime,
                },
            );
        } else if flags.write && tree.read_only.contains(path) {
            return Err(ClientError::AccessDenied);
        }
        if flags.truncate {
            let mtime = tree.tick();
            if let Some(file) = tree.files.get_mut(path) {
                file.data.clear();
                file.mtime = mtime;
            }
        }
        let fd = self.next_id;
        self.next_id += 1;
        self.open_files.insert(fd, path.to_string());
        Ok(RawFd(fd))
    }

    fn close(&mut self, fd: RawFd) {
        self.open_files.remove(&fd.0);
    }

    fn fstat(&mut self, fd: RawFd) -> Result<RawStat> {
        let path = self.file_path(fd)?;
        self.stat(&path)
    }

    fn pread(&mut self, fd: RawFd, offset: u64, len: u32) -> Result<Vec<u8>> {
        let path = self.file_path(fd)?;
        let tree = self.share.tree.read();
        let file = tree.files.get(&path).ok_or(ClientError::NotFound)?;
        let total = file.data.len();
        let start = (offset as usize).min(total);
        let end = start.saturating_add(len as usize).min(total);
        Ok(file.data[start..end].to_vec())
    }

    fn pwrite(&mut self, fd: RawFd, offset: u64, data: &[u8]) -> Result<u32> {
        let path = self.file_path(fd)?;
        let mut tree = self.share.tree.write();
        let mtime = tree.tick();
        let file = tree.files.get_mut(&path).ok_or(ClientError::NotFound)?;
        let offset = offset as usize;
        if file.data.len() < offset {
            // Server-side sparse extension reads back as zeroes.
            file.data.resize(offset, 0);
        }
        let end = offset + data.len();
        if file.data.len() < end {
            file.data.resize(end, 0);
        }
        file.data[offset..end].copy_from_slice(data);
        file.mtime = mtime;
        Ok(data.len() as u32)
    }

    fn ftruncate(&mut self, fd: RawFd, len: u64) -> Result<()> {
        let path = self.file_path(fd)?;
        let mut tree = self.share.tree.write();
        let mtime = tree.tick();
        let file = tree.files.get_mut(&path).ok_or(ClientError::NotFound)?;
        file.data.resize(len as usize, 0);
        file.mtime = mtime;
        Ok(())
    }

    fn fsync(&mut self, _fd: RawFd) -> Result<()> {
        Ok(())
    }

    fn opendir(&mut self, path: &str) -> Result<RawDir> {
        let tree = self.share.tree.read();
        if tree.files.contains_key(path) {
            return Err(ClientError::NotADirectory);
        }
        if !tree.dirs.contains(path) {
            return Err(ClientError::NotFound);
        }
        // Snapshot at open, the way a server-side query buffer behaves.
        let mut entries = vec![
            RawDirEntry {
                name: ".".to_string(),
                kind: EntryKind::Directory,
                size: 0,
                mtime: CLOCK_BASE,
                mtime_nsec: 0,
            },
            RawDirEntry {
                name: "..".to_string(),
                kind: EntryKind::Directory,
                size: 0,
                mtime: CLOCK_BASE,
                mtime_nsec: 0,
            },
        ];
        for (file_path, file) in &tree.files {
            if parent_of(file_path) == path && !file_path.is_empty() {
                entries.push(RawDirEntry {
                    name: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
                    kind: EntryKind::File,
                    size: file.data.len() as u64,
                    mtime: file.mtime,
                    mtime_nsec: 0,
                });
            }
        }
        for dir_path in &tree.dirs {
            if !dir_path.is_empty() && parent_of(dir_path) == path {
                entries.push(RawDirEntry {
                    name: dir_path.rsplit('/').next().unwrap_or(dir_path).to_string(),
                    kind: EntryKind::Directory,
                    size: 0,
                    mtime: CLOCK_BASE,
                    mtime_nsec: 0,
                });
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        self.open_dirs.insert(id, DirCursor { entries, index: 0 });
        Ok(RawDir(id))
    }

    fn readdir(&mut self, dir: RawDir) -> Result<Option<RawDirEntry>> {
        let cursor = self
            .open_dirs
            .get_mut(&dir.0)
            .ok_or_else(|| ClientError::Io("bad directory handle".to_string()))?;
        if cursor.index >= cursor.entries.len() {
            return Ok(None);
        }
        let entry = cursor.entries[cursor.index].clone();
        cursor.index += 1;
        Ok(Some(entry))
    }

    fn closedir(&mut self, dir: RawDir) {
        self.open_dirs.remove(&dir.0);
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let mut tree = self.share.tree.write();
        if tree.dirs.contains(path) || tree.files.contains_key(path) {
            return Err(ClientError::AlreadyExists);
        }
        if !tree.dirs.contains(parent_of(path)) {
            return Err(ClientError::NotFound);
        }
        tree.tick();
        tree.dirs.insert(path.to_string());
        Ok(())
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let mut tree = self.share.tree.write();
        if !tree.dirs.contains(path) {
            return Err(ClientError::NotFound);
        }
        let populated = tree.files.keys().any(|f| parent_of(f) == path)
            || tree.dirs.iter().any(|d| !d.is_empty() && parent_of(d) == path);
        if populated {
            return Err(ClientError::NotEmpty);
        }
        tree.tick();
        tree.dirs.remove(path);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        let mut tree = self.share.tree.write();
        if tree.files.remove(path).is_none() {
            return Err(ClientError::NotFound);
        }
        tree.tick();
        Ok(())
    }

    fn write_probe(&mut self, path: &str, _kind: EntryKind) -> Result<bool> {
        let tree = self.share.tree.read();
        if !tree.dirs.contains(path) && !tree.files.contains_key(path) {
            return Err(ClientError::NotFound);
        }
        Ok(!tree.read_only.contains(path))
    }
}
