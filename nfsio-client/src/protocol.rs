//! Raw records and constants exchanged with the client library.

use serde::{Deserialize, Serialize};

/// Native stat record as filled in by the stat primitives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsStat64 {
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
}

/// One entry returned by readdir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsDirent {
    pub name: String,
    pub inode: u64,
    pub mode: u32,
    pub size: u64,
}

/// Open flags understood by the open and create primitives
pub mod flags {
    pub const O_RDONLY: i32 = libc::O_RDONLY;
    pub const O_WRONLY: i32 = libc::O_WRONLY;
    pub const O_RDWR: i32 = libc::O_RDWR;
    pub const O_ACCMODE: i32 = libc::O_ACCMODE;
    pub const O_CREAT: i32 = libc::O_CREAT;
    pub const O_EXCL: i32 = libc::O_EXCL;
    pub const O_TRUNC: i32 = libc::O_TRUNC;
    pub const O_APPEND: i32 = libc::O_APPEND;

    /// Check if the access bits allow reading
    pub fn readable(flags: i32) -> bool {
        let access = flags & O_ACCMODE;
        access == O_RDONLY || access == O_RDWR
    }

    /// Check if the access bits allow writing
    pub fn writable(flags: i32) -> bool {
        let access = flags & O_ACCMODE;
        access == O_WRONLY || access == O_RDWR
    }
}

/// Whence values for lseek
pub mod whence {
    pub const SEEK_SET: i32 = libc::SEEK_SET;
    pub const SEEK_CUR: i32 = libc::SEEK_CUR;
    pub const SEEK_END: i32 = libc::SEEK_END;
}

/// File type bits carried in `nfs_mode`
pub mod mode {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFLNK: u32 = 0o120000;
}

/// Primitive calls, used to address fault injection and tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Mount,
    Open,
    Create,
    Close,
    Read,
    Write,
    Lseek,
    Ftruncate,
    Fsync,
    Stat,
    Lstat,
    Fstat,
    Unlink,
    Mkdir,
    Rmdir,
    Opendir,
}

impl Primitive {
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Mount => "mount",
            Primitive::Open => "open",
            Primitive::Create => "create",
            Primitive::Close => "close",
            Primitive::Read => "read",
            Primitive::Write => "write",
            Primitive::Lseek => "lseek",
            Primitive::Ftruncate => "ftruncate",
            Primitive::Fsync => "fsync",
            Primitive::Stat => "stat",
            Primitive::Lstat => "lstat",
            Primitive::Fstat => "fstat",
            Primitive::Unlink => "unlink",
            Primitive::Mkdir => "mkdir",
            Primitive::Rmdir => "rmdir",
            Primitive::Opendir => "opendir",
        }
    }
}
