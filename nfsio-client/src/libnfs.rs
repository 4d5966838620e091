//! `NfsClient` backed by the system libnfs library.
//!
//! Built with the `libnfs` feature. Links against `libnfs.so` and targets
//! the 4.x/5.x call signatures (`nfs_read`/`nfs_write` take the count
//! before the buffer). One [`LibnfsClient`] owns one `nfs_context`; the
//! context is not thread safe, so the client is neither `Send` nor `Sync`.

use crate::client::{Connector, NfsClient};
use crate::protocol::{NfsDirent, NfsStat64};
use nfsio_common::utils::url;
use nfsio_common::NfsUrl;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};
use tracing::{debug, trace};

#[allow(non_camel_case_types)]
mod raw {
    use super::*;

    #[repr(C)]
    pub struct nfs_context {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct nfsfh {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct nfsdir {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct nfs_url {
        pub server: *mut c_char,
        pub path: *mut c_char,
        pub file: *mut c_char,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct nfs_stat_64 {
        pub nfs_dev: u64,
        pub nfs_ino: u64,
        pub nfs_mode: u64,
        pub nfs_nlink: u64,
        pub nfs_uid: u64,
        pub nfs_gid: u64,
        pub nfs_rdev: u64,
        pub nfs_size: u64,
        pub nfs_blksize: u64,
        pub nfs_blocks: u64,
        pub nfs_atime: u64,
        pub nfs_mtime: u64,
        pub nfs_ctime: u64,
        pub nfs_atime_nsec: u64,
        pub nfs_mtime_nsec: u64,
        pub nfs_ctime_nsec: u64,
        pub nfs_used: u64,
    }

    /// Leading fields of `struct nfsdirent`; only read through a pointer
    #[repr(C)]
    pub struct nfsdirent {
        pub next: *mut nfsdirent,
        pub name: *mut c_char,
        pub inode: u64,
        pub kind: u32,
        pub mode: u32,
        pub size: u64,
    }

    #[link(name = "nfs")]
    extern "C" {
        pub fn nfs_init_context() -> *mut nfs_context;
        pub fn nfs_destroy_context(nfs: *mut nfs_context);
        pub fn nfs_get_error(nfs: *mut nfs_context) -> *mut c_char;
        pub fn nfs_set_nfsport(nfs: *mut nfs_context, port: c_int);

        pub fn nfs_parse_url_dir(nfs: *mut nfs_context, url: *const c_char) -> *mut nfs_url;
        pub fn nfs_destroy_url(url: *mut nfs_url);
        pub fn nfs_mount(nfs: *mut nfs_context, server: *const c_char, export: *const c_char) -> c_int;

        pub fn nfs_open(nfs: *mut nfs_context, path: *const c_char, flags: c_int, fh: *mut *mut nfsfh) -> c_int;
        pub fn nfs_create(
            nfs: *mut nfs_context,
            path: *const c_char,
            flags: c_int,
            mode: c_int,
            fh: *mut *mut nfsfh,
        ) -> c_int;
        pub fn nfs_close(nfs: *mut nfs_context, fh: *mut nfsfh) -> c_int;
        pub fn nfs_read(nfs: *mut nfs_context, fh: *mut nfsfh, count: u64, buf: *mut c_void) -> c_int;
        pub fn nfs_write(nfs: *mut nfs_context, fh: *mut nfsfh, count: u64, buf: *const c_void) -> c_int;
        pub fn nfs_lseek(
            nfs: *mut nfs_context,
            fh: *mut nfsfh,
            offset: i64,
            whence: c_int,
            current: *mut u64,
        ) -> c_int;
        pub fn nfs_ftruncate(nfs: *mut nfs_context, fh: *mut nfsfh, length: u64) -> c_int;
        pub fn nfs_fsync(nfs: *mut nfs_context, fh: *mut nfsfh) -> c_int;

        pub fn nfs_stat64(nfs: *mut nfs_context, path: *const c_char, st: *mut nfs_stat_64) -> c_int;
        pub fn nfs_lstat64(nfs: *mut nfs_context, path: *const c_char, st: *mut nfs_stat_64) -> c_int;
        pub fn nfs_fstat64(nfs: *mut nfs_context, fh: *mut nfsfh, st: *mut nfs_stat_64) -> c_int;

        pub fn nfs_unlink(nfs: *mut nfs_context, path: *const c_char) -> c_int;
        pub fn nfs_mkdir(nfs: *mut nfs_context, path: *const c_char) -> c_int;
        pub fn nfs_rmdir(nfs: *mut nfs_context, path: *const c_char) -> c_int;

        pub fn nfs_opendir(nfs: *mut nfs_context, path: *const c_char, dir: *mut *mut nfsdir) -> c_int;
        pub fn nfs_readdir(nfs: *mut nfs_context, dir: *mut nfsdir) -> *mut nfsdirent;
        pub fn nfs_closedir(nfs: *mut nfs_context, dir: *mut nfsdir);
    }
}

impl From<raw::nfs_stat_64> for NfsStat64 {
    fn from(st: raw::nfs_stat_64) -> Self {
        NfsStat64 {
            nfs_dev: st.nfs_dev,
            nfs_ino: st.nfs_ino,
            nfs_mode: st.nfs_mode,
            nfs_nlink: st.nfs_nlink,
            nfs_uid: st.nfs_uid,
            nfs_gid: st.nfs_gid,
            nfs_rdev: st.nfs_rdev,
            nfs_size: st.nfs_size,
            nfs_blksize: st.nfs_blksize,
            nfs_blocks: st.nfs_blocks,
            nfs_atime: st.nfs_atime,
            nfs_mtime: st.nfs_mtime,
            nfs_ctime: st.nfs_ctime,
            nfs_atime_nsec: st.nfs_atime_nsec,
            nfs_mtime_nsec: st.nfs_mtime_nsec,
            nfs_ctime_nsec: st.nfs_ctime_nsec,
        }
    }
}

/// Creates libnfs sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct LibnfsConnector;

impl Connector for LibnfsConnector {
    type Client = LibnfsClient;

    fn init_context(&self) -> Option<LibnfsClient> {
        // SAFETY: no preconditions; a null return means allocation failed
        let ctx = NonNull::new(unsafe { raw::nfs_init_context() })?;
        trace!("Initialized libnfs context");
        Some(LibnfsClient {
            ctx,
            local_error: RefCell::new(None),
        })
    }
}

/// Open libnfs file handle
#[derive(Debug)]
pub struct LibnfsFile(NonNull<raw::nfsfh>);

/// Open libnfs directory stream
#[derive(Debug)]
pub struct LibnfsDir(NonNull<raw::nfsdir>);

/// One `nfs_context`, destroyed on drop
pub struct LibnfsClient {
    ctx: NonNull<raw::nfs_context>,
    /// Failures raised on this side of the FFI boundary (bad paths)
    local_error: RefCell<Option<String>>,
}

impl LibnfsClient {
    /// Raw context for a library call; any earlier local error is stale
    fn ctx(&self) -> *mut raw::nfs_context {
        self.local_error.replace(None);
        self.ctx.as_ptr()
    }

    /// Borrow `s` as a C string, or fail the call with EINVAL
    fn c_str(&self, what: &str, s: &str) -> Result<CString, i32> {
        match CString::new(s) {
            Ok(c) => Ok(c),
            Err(_) => {
                self.local_error
                    .replace(Some(format!("{} contains a NUL byte: {:?}", what, s)));
                Err(-libc::EINVAL)
            }
        }
    }

    fn path_call(&self, path: &str, call: impl FnOnce(*const c_char) -> c_int) -> i32 {
        match self.c_str("path", path) {
            Ok(c) => call(c.as_ptr()),
            Err(status) => status,
        }
    }

    fn stat_call(
        &self,
        path: &str,
        st: &mut NfsStat64,
        call: unsafe extern "C" fn(*mut raw::nfs_context, *const c_char, *mut raw::nfs_stat_64) -> c_int,
    ) -> i32 {
        let mut native = raw::nfs_stat_64::default();
        // SAFETY: context is live, path is NUL terminated, native is a valid out record
        let status = self.path_call(path, |p| unsafe { call(self.ctx(), p, &mut native) });
        if status == 0 {
            *st = native.into();
        }
        status
    }

    fn open_call(
        &self,
        path: &str,
        fh: &mut Option<LibnfsFile>,
        call: impl FnOnce(*const c_char, *mut *mut raw::nfsfh) -> c_int,
    ) -> i32 {
        let mut handle: *mut raw::nfsfh = ptr::null_mut();
        let status = self.path_call(path, |p| call(p, &mut handle));
        if status == 0 {
            *fh = NonNull::new(handle).map(LibnfsFile);
        }
        status
    }
}

impl NfsClient for LibnfsClient {
    type File = LibnfsFile;
    type Dir = LibnfsDir;

    fn parse_url_dir(&self, input: &str) -> Option<NfsUrl> {
        let parsed = match url::parse_url_dir(input) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.local_error.replace(Some(e.to_string()));
                return None;
            }
        };
        if !url::is_nfs_url(input) {
            return Some(parsed);
        }

        // libnfs applies the URL arguments (uid, gid, version, ...) to the context
        let c_url = self.c_str("URL", input).ok()?;
        // SAFETY: context is live and c_url is NUL terminated
        let native = unsafe { raw::nfs_parse_url_dir(self.ctx(), c_url.as_ptr()) };
        if native.is_null() {
            return None;
        }
        // SAFETY: native came from nfs_parse_url_dir and is destroyed exactly once
        unsafe { raw::nfs_destroy_url(native) };
        Some(parsed)
    }

    fn mount(&self, server: &str, export: &str) -> i32 {
        let (host, port) = url::split_server_port(server);
        let (host, export) = match (self.c_str("server", host), self.c_str("export", export)) {
            (Ok(host), Ok(export)) => (host, export),
            (Err(status), _) | (_, Err(status)) => return status,
        };
        if let Some(port) = port {
            // SAFETY: context is live
            unsafe { raw::nfs_set_nfsport(self.ctx(), c_int::from(port)) };
        }
        debug!("libnfs mount {}:{}", server, export.to_string_lossy());
        // SAFETY: context is live, both strings are NUL terminated
        unsafe { raw::nfs_mount(self.ctx(), host.as_ptr(), export.as_ptr()) }
    }

    fn open(&self, path: &str, flags: i32, fh: &mut Option<LibnfsFile>) -> i32 {
        // SAFETY: context is live; the out pointer is valid for the call
        self.open_call(path, fh, |p, out| unsafe { raw::nfs_open(self.ctx(), p, flags, out) })
    }

    fn create(&self, path: &str, flags: i32, mode: u32, fh: &mut Option<LibnfsFile>) -> i32 {
        let mode = (mode & 0o7777) as c_int;
        // SAFETY: context is live; the out pointer is valid for the call
        self.open_call(path, fh, |p, out| unsafe {
            raw::nfs_create(self.ctx(), p, flags, mode, out)
        })
    }

    fn close(&self, fh: &mut LibnfsFile) -> i32 {
        // SAFETY: the handle was opened on this context; callers drop it after close
        unsafe { raw::nfs_close(self.ctx(), fh.0.as_ptr()) }
    }

    fn read(&self, fh: &mut LibnfsFile, buf: &mut [u8]) -> i64 {
        // SAFETY: buf is valid for buf.len() writable bytes
        let status = unsafe {
            raw::nfs_read(self.ctx(), fh.0.as_ptr(), buf.len() as u64, buf.as_mut_ptr().cast())
        };
        i64::from(status)
    }

    fn write(&self, fh: &mut LibnfsFile, buf: &[u8]) -> i64 {
        // SAFETY: buf is valid for buf.len() readable bytes
        let status = unsafe {
            raw::nfs_write(self.ctx(), fh.0.as_ptr(), buf.len() as u64, buf.as_ptr().cast())
        };
        i64::from(status)
    }

    fn lseek(&self, fh: &mut LibnfsFile, offset: i64, whence: i32, current: &mut u64) -> i32 {
        // SAFETY: handle belongs to this context; current is a valid out slot
        unsafe { raw::nfs_lseek(self.ctx(), fh.0.as_ptr(), offset, whence, current) }
    }

    fn ftruncate(&self, fh: &mut LibnfsFile, length: u64) -> i32 {
        // SAFETY: handle belongs to this context
        unsafe { raw::nfs_ftruncate(self.ctx(), fh.0.as_ptr(), length) }
    }

    fn fsync(&self, fh: &mut LibnfsFile) -> i32 {
        // SAFETY: handle belongs to this context
        unsafe { raw::nfs_fsync(self.ctx(), fh.0.as_ptr()) }
    }

    fn stat64(&self, path: &str, st: &mut NfsStat64) -> i32 {
        self.stat_call(path, st, raw::nfs_stat64)
    }

    fn lstat64(&self, path: &str, st: &mut NfsStat64) -> i32 {
        self.stat_call(path, st, raw::nfs_lstat64)
    }

    fn fstat64(&self, fh: &LibnfsFile, st: &mut NfsStat64) -> i32 {
        let mut native = raw::nfs_stat_64::default();
        // SAFETY: handle belongs to this context; native is a valid out record
        let status = unsafe { raw::nfs_fstat64(self.ctx(), fh.0.as_ptr(), &mut native) };
        if status == 0 {
            *st = native.into();
        }
        status
    }

    fn unlink(&self, path: &str) -> i32 {
        // SAFETY: context is live, path is NUL terminated
        self.path_call(path, |p| unsafe { raw::nfs_unlink(self.ctx(), p) })
    }

    fn mkdir(&self, path: &str) -> i32 {
        // SAFETY: context is live, path is NUL terminated
        self.path_call(path, |p| unsafe { raw::nfs_mkdir(self.ctx(), p) })
    }

    fn rmdir(&self, path: &str) -> i32 {
        // SAFETY: context is live, path is NUL terminated
        self.path_call(path, |p| unsafe { raw::nfs_rmdir(self.ctx(), p) })
    }

    fn opendir(&self, path: &str, dir: &mut Option<LibnfsDir>) -> i32 {
        let mut handle: *mut raw::nfsdir = ptr::null_mut();
        // SAFETY: context is live; the out pointer is valid for the call
        let status = self.path_call(path, |p| unsafe { raw::nfs_opendir(self.ctx(), p, &mut handle) });
        if status == 0 {
            *dir = NonNull::new(handle).map(LibnfsDir);
        }
        status
    }

    fn readdir(&self, dir: &mut LibnfsDir) -> Option<NfsDirent> {
        // SAFETY: the stream is open on this context
        let entry = unsafe { raw::nfs_readdir(self.ctx(), dir.0.as_ptr()) };
        // SAFETY: a non-null entry stays valid until the stream is closed
        let entry = unsafe { entry.as_ref() }?;
        let name = if entry.name.is_null() {
            String::new()
        } else {
            // SAFETY: libnfs entry names are NUL terminated
            unsafe { CStr::from_ptr(entry.name) }.to_string_lossy().into_owned()
        };
        Some(NfsDirent {
            name,
            inode: entry.inode,
            mode: entry.mode,
            size: entry.size,
        })
    }

    fn closedir(&self, dir: LibnfsDir) {
        // SAFETY: the stream is open on this context and consumed here
        unsafe { raw::nfs_closedir(self.ctx(), dir.0.as_ptr()) }
    }

    fn get_error(&self) -> String {
        if let Some(message) = self.local_error.borrow().as_ref() {
            return message.clone();
        }
        // SAFETY: context is live; the message is owned by the context
        let message = unsafe { raw::nfs_get_error(self.ctx()) };
        if message.is_null() {
            String::new()
        } else {
            // SAFETY: non-null messages are NUL terminated
            unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
        }
    }
}

impl Drop for LibnfsClient {
    fn drop(&mut self) {
        trace!("Destroying libnfs context");
        // SAFETY: the context is owned by this client and destroyed once
        unsafe { raw::nfs_destroy_context(self.ctx()) }
    }
}
