//! FFI backend over the system libsmb2 library
//!
//! Compiled only with the `libsmb2` feature; links `libsmb2.so`. The
//! raw context is not thread-safe, which is exactly why the driver
//! confines each client to one thread — this type is `Send` solely so
//! it can be moved onto that thread at construction.

#![cfg(feature = "libsmb2")]

use std::collections::HashMap;
use std::ffi::{CStr, CString};

use tracing::debug;

use crate::client::{
    EntryKind, OpenFlags, RawDir, RawDirEntry, RawFd, RawStat, ShareClient,
};
use crate::endpoint::{AuthMode, SmbEndpoint};
use crate::error::{ClientError, Result};

#[allow(non_camel_case_types)]
mod sys {
    use std::os::raw::{c_char, c_int, c_uint};

    #[repr(C)]
    pub struct smb2_context {
        _unused: [u8; 0],
    }
    #[repr(C)]
    pub struct smb2fh {
        _unused: [u8; 0],
    }
    #[repr(C)]
    pub struct smb2dir {
        _unused: [u8; 0],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct smb2_stat_64 {
        pub smb2_type: u32,
        pub smb2_nlink: u32,
        pub smb2_ino: u64,
        pub smb2_size: u64,
        pub smb2_atime: u64,
        pub smb2_atime_nsec: u64,
        pub smb2_mtime: u64,
        pub smb2_mtime_nsec: u64,
        pub smb2_ctime: u64,
        pub smb2_ctime_nsec: u64,
        pub smb2_btime: u64,
        pub smb2_btime_nsec: u64,
    }

    #[repr(C)]
    pub struct smb2dirent {
        pub name: *const c_char,
        pub st: smb2_stat_64,
    }

    pub const SMB2_TYPE_FILE: u32 = 0x0000_0000;
    pub const SMB2_TYPE_DIRECTORY: u32 = 0x0000_0001;

    pub const SMB2_SEC_UNDEFINED: c_int = 0;
    pub const SMB2_SEC_NTLMSSP: c_int = 1;
    pub const SMB2_SEC_KRB5: c_int = 2;

    #[link(name = "smb2")]
    extern "C" {
        pub fn smb2_init_context() -> *mut smb2_context;
        pub fn smb2_destroy_context(ctx: *mut smb2_context);
        pub fn smb2_get_error(ctx: *mut smb2_context) -> *const c_char;

        pub fn smb2_set_authentication(ctx: *mut smb2_context, val: c_int);
        pub fn smb2_set_user(ctx: *mut smb2_context, user: *const c_char);
        pub fn smb2_set_password(ctx: *mut smb2_context, password: *const c_char);
        pub fn smb2_set_domain(ctx: *mut smb2_context, domain: *const c_char);

        pub fn smb2_connect_share(
            ctx: *mut smb2_context,
            server: *const c_char,
            share: *const c_char,
            user: *const c_char,
        ) -> c_int;
        pub fn smb2_disconnect_share(ctx: *mut smb2_context) -> c_int;

        pub fn smb2_get_max_read_size(ctx: *mut smb2_context) -> c_uint;
        pub fn smb2_get_max_write_size(ctx: *mut smb2_context) -> c_uint;

        pub fn smb2_stat(
            ctx: *mut smb2_context,
            path: *const c_char,
            st: *mut smb2_stat_64,
        ) -> c_int;
        pub fn smb2_fstat(
            ctx: *mut smb2_context,
            fh: *mut smb2fh,
            st: *mut smb2_stat_64,
        ) -> c_int;

        pub fn smb2_open(
            ctx: *mut smb2_context,
            path: *const c_char,
            flags: c_int,
        ) -> *mut smb2fh;
        pub fn smb2_close(ctx: *mut smb2_context, fh: *mut smb2fh) -> c_int;
        pub fn smb2_pread(
            ctx: *mut smb2_context,
            fh: *mut smb2fh,
            buf: *mut u8,
            count: u32,
            offset: u64,
        ) -> c_int;
        pub fn smb2_pwrite(
            ctx: *mut smb2_context,
            fh: *mut smb2fh,
            buf: *const u8,
            count: u32,
            offset: u64,
        ) -> c_int;
        pub fn smb2_ftruncate(ctx: *mut smb2_context, fh: *mut smb2fh, length: u64) -> c_int;
        pub fn smb2_fsync(ctx: *mut smb2_context, fh: *mut smb2fh) -> c_int;

        pub fn smb2_opendir(ctx: *mut smb2_context, path: *const c_char) -> *mut smb2dir;
        pub fn smb2_readdir(ctx: *mut smb2_context, dir: *mut smb2dir) -> *const smb2dirent;
        pub fn smb2_closedir(ctx: *mut smb2_context, dir: *mut smb2dir);

        pub fn smb2_mkdir(ctx: *mut smb2_context, path: *const c_char) -> c_int;
        pub fn smb2_rmdir(ctx: *mut smb2_context, path: *const c_char) -> c_int;
        pub fn smb2_unlink(ctx: *mut smb2_context, path: *const c_char) -> c_int;
    }
}

/// [`ShareClient`] backed by libsmb2
pub struct LibsmbClient {
    ctx: *mut sys::smb2_context,
    next_id: u64,
    files: HashMap<u64, *mut sys::smb2fh>,
    dirs: HashMap<u64, *mut sys::smb2dir>,
}

// SAFETY: the raw context is confined to the driver thread; Send only
// covers the initial move onto it.
unsafe impl Send for LibsmbClient {}

impl LibsmbClient {
    /// A client with no context yet; `connect` allocates it.
    pub fn new() -> Self {
        Self {
            ctx: std::ptr::null_mut(),
            next_id: 1,
            files: HashMap::new(),
            dirs: HashMap::new(),
        }
    }

    fn error_string(&self) -> String {
        if self.ctx.is_null() {
            return String::new();
        }
        // SAFETY: ctx is live; libsmb2 hands back a NUL-terminated
        // string owned by the context.
        unsafe {
            let raw = sys::smb2_get_error(self.ctx);
            if raw.is_null() {
                String::new()
            } else {
                CStr::from_ptr(raw).to_string_lossy().into_owned()
            }
        }
    }

    fn check_rc(&self, rc: i32) -> Result<i32> {
        if rc >= 0 {
            return Ok(rc);
        }
        let err = ClientError::from_errno(-rc);
        match err {
            ClientError::Io(_) => {
                let msg = self.error_string();
                if msg.is_empty() {
                    Err(err)
                } else {
                    Err(ClientError::Io(msg))
                }
            }
            other => Err(other),
        }
    }

    fn file(&self, fd: RawFd) -> Result<*mut sys::smb2fh> {
        self.files
            .get(&fd.0)
            .copied()
            .ok_or_else(|| ClientError::Io("bad file handle".to_string()))
    }

    /// Classify a failed `smb2_open`. The library reports open failures
    /// only through its error string, so this matches the stable parts
    /// of those messages. Access checks come before the directory
    /// check: a denied directory message can mention both.
    fn open_error(&self) -> ClientError {
        let msg = self.error_string();
        let lower = msg.to_ascii_lowercase();
        if lower.contains("no such file") || lower.contains("not found") {
            ClientError::NotFound
        } else if lower.contains("denied") {
            ClientError::AccessDenied
        } else if lower.contains("directory") {
            ClientError::IsDirectory
        } else {
            ClientError::Io(msg)
        }
    }

    fn c_path(path: &str) -> Result<CString> {
        CString::new(path).map_err(|_| ClientError::Io("path contains NUL".to_string()))
    }
}

impl std::fmt::Debug for LibsmbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibsmbClient")
            .field("connected", &!self.ctx.is_null())
            .finish()
    }
}

impl Drop for LibsmbClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn convert_stat(st: &sys::smb2_stat_64) -> RawStat {
    RawStat {
        inode: st.smb2_ino,
        size: st.smb2_size,
        kind: if st.smb2_type == sys::SMB2_TYPE_DIRECTORY {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        atime: st.smb2_atime,
        atime_nsec: st.smb2_atime_nsec,
        mtime: st.smb2_mtime,
        mtime_nsec: st.smb2_mtime_nsec,
        ctime: st.smb2_ctime,
        ctime_nsec: st.smb2_ctime_nsec,
        btime: st.smb2_btime,
        btime_nsec: st.smb2_btime_nsec,
    }
}

fn open_bits(flags: OpenFlags) -> i32 {
    let mut bits = if flags.write {
        libc::O_RDWR
    } else {
        libc::O_RDONLY
    };
    if flags.create {
        bits |= libc::O_CREAT;
    }
    if flags.truncate {
        bits |= libc::O_TRUNC;
    }
    bits
}

impl ShareClient for LibsmbClient {
    fn connect(&mut self, endpoint: &SmbEndpoint) -> Result<()> {
        // SAFETY: plain constructor call.
        let ctx = unsafe { sys::smb2_init_context() };
        if ctx.is_null() {
            return Err(ClientError::ConnectFailed(
                "smb2_init_context failed".to_string(),
            ));
        }
        self.ctx = ctx;

        let creds = &endpoint.credentials;
        // SAFETY: ctx is live; the CStrings outlive each call.
        unsafe {
            match endpoint.auth {
                AuthMode::Anonymous => sys::smb2_set_authentication(ctx, sys::SMB2_SEC_UNDEFINED),
                AuthMode::NtlmSsp => sys::smb2_set_authentication(ctx, sys::SMB2_SEC_NTLMSSP),
                AuthMode::Krb5Cache => sys::smb2_set_authentication(ctx, sys::SMB2_SEC_KRB5),
            }
            if let Some(user) = &creds.user {
                let user = Self::c_path(user)?;
                sys::smb2_set_user(ctx, user.as_ptr());
            }
            if let Some(password) = &creds.password {
                let password = Self::c_path(password)?;
                sys::smb2_set_password(ctx, password.as_ptr());
            }
            if let Some(domain) = &creds.domain {
                let domain = Self::c_path(domain)?;
                sys::smb2_set_domain(ctx, domain.as_ptr());
            }
        }

        let server = if endpoint.port == crate::endpoint::DEFAULT_PORT {
            endpoint.server.clone()
        } else {
            format!("{}:{}", endpoint.server, endpoint.port)
        };
        let server = Self::c_path(&server)?;
        let share = Self::c_path(&endpoint.share)?;
        let user = Self::c_path(creds.user.as_deref().unwrap_or("Guest"))?;
        // SAFETY: all pointers valid for the duration of the call.
        let rc = unsafe { sys::smb2_connect_share(ctx, server.as_ptr(), share.as_ptr(), user.as_ptr()) };
        if rc < 0 {
            let msg = self.error_string();
            self.disconnect();
            return Err(ClientError::ConnectFailed(if msg.is_empty() {
                format!("{endpoint}: connect failed ({rc})")
            } else {
                msg
            }));
        }
        debug!(%endpoint, "share connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.ctx.is_null() {
            return;
        }
        // SAFETY: every stored handle belongs to this context and is
        // closed exactly once before the context dies.
        unsafe {
            for (_, fh) in self.files.drain() {
                sys::smb2_close(self.ctx, fh);
            }
            for (_, dir) in self.dirs.drain() {
                sys::smb2_closedir(self.ctx, dir);
            }
            sys::smb2_disconnect_share(self.ctx);
            sys::smb2_destroy_context(self.ctx);
        }
        self.ctx = std::ptr::null_mut();
    }

    fn max_io_size(&self) -> u64 {
        // SAFETY: ctx is live after connect.
        let (r, w) = unsafe {
            (
                sys::smb2_get_max_read_size(self.ctx) as u64,
                sys::smb2_get_max_write_size(self.ctx) as u64,
            )
        };
        r.min(w).max(1)
    }

    fn stat(&mut self, path: &str) -> Result<RawStat> {
        let path = Self::c_path(path)?;
        // SAFETY: ctx live, out-param is a plain struct on our stack.
        unsafe {
            let mut st = std::mem::zeroed::<sys::smb2_stat_64>();
            self.check_rc(sys::smb2_stat(self.ctx, path.as_ptr(), &mut st))?;
            Ok(convert_stat(&st))
        }
    }

    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<RawFd> {
        let c_path = Self::c_path(path)?;
        // SAFETY: ctx live; a null return carries the error in ctx.
        let fh = unsafe { sys::smb2_open(self.ctx, c_path.as_ptr(), open_bits(flags)) };
        if fh.is_null() {
            return Err(self.open_error());
        }
        let id = self.next_id;
        self.next_id += 1;
        self.files.insert(id, fh);
        Ok(RawFd(id))
    }

    fn close(&mut self, fd: RawFd) {
        if let Some(fh) = self.files.remove(&fd.0) {
            // SAFETY: handle owned by this context, removed from the map.
            unsafe {
                sys::smb2_close(self.ctx, fh);
            }
        }
    }

    fn fstat(&mut self, fd: RawFd) -> Result<RawStat> {
        let fh = self.file(fd)?;
        // SAFETY: ctx and handle live.
        unsafe {
            let mut st = std::mem::zeroed::<sys::smb2_stat_64>();
            self.check_rc(sys::smb2_fstat(self.ctx, fh, &mut st))?;
            Ok(convert_stat(&st))
        }
    }

    fn pread(&mut self, fd: RawFd, offset: u64, len: u32) -> Result<Vec<u8>> {
        let fh = self.file(fd)?;
        let mut buf = vec![0u8; len as usize];
        // SAFETY: buf is at least `len` bytes.
        let rc = unsafe { sys::smb2_pread(self.ctx, fh, buf.as_mut_ptr(), len, offset) };
        let read = self.check_rc(rc)? as usize;
        buf.truncate(read);
        Ok(buf)
    }

    fn pwrite(&mut self, fd: RawFd, offset: u64, data: &[u8]) -> Result<u32> {
        let fh = self.file(fd)?;
        // SAFETY: data lives across the call.
        let rc = unsafe {
            sys::smb2_pwrite(self.ctx, fh, data.as_ptr(), data.len() as u32, offset)
        };
        Ok(self.check_rc(rc)? as u32)
    }

    fn ftruncate(&mut self, fd: RawFd, len: u64) -> Result<()> {
        let fh = self.file(fd)?;
        // SAFETY: ctx and handle live.
        let rc = unsafe { sys::smb2_ftruncate(self.ctx, fh, len) };
        self.check_rc(rc).map(|_| ())
    }

    fn fsync(&mut self, fd: RawFd) -> Result<()> {
        let fh = self.file(fd)?;
        // SAFETY: ctx and handle live.
        let rc = unsafe { sys::smb2_fsync(self.ctx, fh) };
        self.check_rc(rc).map(|_| ())
    }

    fn opendir(&mut self, path: &str) -> Result<RawDir> {
        let c_path = Self::c_path(path)?;
        // SAFETY: ctx live.
        let dir = unsafe { sys::smb2_opendir(self.ctx, c_path.as_ptr()) };
        if dir.is_null() {
            let msg = self.error_string();
            return Err(if msg.contains("No such file") {
                ClientError::NotFound
            } else {
                ClientError::Io(msg)
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.dirs.insert(id, dir);
        Ok(RawDir(id))
    }

    fn readdir(&mut self, dir: RawDir) -> Result<Option<RawDirEntry>> {
        let handle = self
            .dirs
            .get(&dir.0)
            .copied()
            .ok_or_else(|| ClientError::Io("bad directory handle".to_string()))?;
        // SAFETY: the dirent points into the directory buffer, which
        // outlives this call; everything is copied out before return.
        unsafe {
            let entry = sys::smb2_readdir(self.ctx, handle);
            if entry.is_null() {
                return Ok(None);
            }
            let name = CStr::from_ptr((*entry).name).to_string_lossy().into_owned();
            let st = (*entry).st;
            Ok(Some(RawDirEntry {
                name,
                kind: if st.smb2_type == sys::SMB2_TYPE_DIRECTORY {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size: st.smb2_size,
                mtime: st.smb2_mtime,
                mtime_nsec: st.smb2_mtime_nsec,
            }))
        }
    }

    fn closedir(&mut self, dir: RawDir) {
        if let Some(handle) = self.dirs.remove(&dir.0) {
            // SAFETY: handle owned by this context, removed from the map.
            unsafe {
                sys::smb2_closedir(self.ctx, handle);
            }
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = Self::c_path(path)?;
        // SAFETY: ctx live.
        let rc = unsafe { sys::smb2_mkdir(self.ctx, path.as_ptr()) };
        self.check_rc(rc).map(|_| ())
    }

    fn rmdir(&mut self, path: &str) -> Result<()> {
        let path = Self::c_path(path)?;
        // SAFETY: ctx live.
        let rc = unsafe { sys::smb2_rmdir(self.ctx, path.as_ptr()) };
        self.check_rc(rc).map(|_| ())
    }

    fn unlink(&mut self, path: &str) -> Result<()> {
        let path = Self::c_path(path)?;
        // SAFETY: ctx live.
        let rc = unsafe { sys::smb2_unlink(self.ctx, path.as_ptr()) };
        self.check_rc(rc).map(|_| ())
    }

    fn write_probe(&mut self, path: &str, kind: EntryKind) -> Result<bool> {
        // Open for write without touching contents, then close. The
        // server evaluates the ACL at open time. EISDIR means the
        // access check passed and only the entry type was objected to.
        match self.open(path, OpenFlags::write_keep()) {
            Ok(fd) => {
                self.close(fd);
                Ok(true)
            }
            Err(ClientError::AccessDenied) => Ok(false),
            Err(ClientError::IsDirectory) if kind == EntryKind::Directory => Ok(true),
            Err(e) => Err(e),
        }
    }
}

impl Default for LibsmbClient {
    fn default() -> Self {
        Self::new()
    }
}
