use crate::protocol::{NfsDirent, NfsStat64};
use nfsio_common::NfsUrl;

/// One session with an NFS server, exposing the primitive call surface.
///
/// Every fallible call returns a signed status: non-negative on success
/// (a byte count for read/write, zero otherwise) and a negated errno on
/// failure, with a description left in the session's last-error slot.
/// Payloads come back through out-parameters. Dropping the client
/// destroys the session.
pub trait NfsClient {
    /// Open file reference
    type File;

    /// Open directory stream
    type Dir;

    /// Parse a URL whose path names a directory
    fn parse_url_dir(&self, url: &str) -> Option<NfsUrl>;

    fn mount(&self, server: &str, export: &str) -> i32;

    fn open(&self, path: &str, flags: i32, fh: &mut Option<Self::File>) -> i32;

    fn create(&self, path: &str, flags: i32, mode: u32, fh: &mut Option<Self::File>) -> i32;

    fn close(&self, fh: &mut Self::File) -> i32;

    /// Read up to `buf.len()` bytes at the handle's offset
    fn read(&self, fh: &mut Self::File, buf: &mut [u8]) -> i64;

    /// Write `buf` at the handle's offset (or the end, for append handles)
    fn write(&self, fh: &mut Self::File, buf: &[u8]) -> i64;

    fn lseek(&self, fh: &mut Self::File, offset: i64, whence: i32, current: &mut u64) -> i32;

    fn ftruncate(&self, fh: &mut Self::File, length: u64) -> i32;

    fn fsync(&self, fh: &mut Self::File) -> i32;

    fn stat64(&self, path: &str, st: &mut NfsStat64) -> i32;

    /// Like `stat64` but does not follow a terminal symbolic link
    fn lstat64(&self, path: &str, st: &mut NfsStat64) -> i32;

    fn fstat64(&self, fh: &Self::File, st: &mut NfsStat64) -> i32;

    fn unlink(&self, path: &str) -> i32;

    fn mkdir(&self, path: &str) -> i32;

    fn rmdir(&self, path: &str) -> i32;

    fn opendir(&self, path: &str, dir: &mut Option<Self::Dir>) -> i32;

    /// Next entry, or `None` at the end of the stream
    fn readdir(&self, dir: &mut Self::Dir) -> Option<NfsDirent>;

    fn closedir(&self, dir: Self::Dir);

    /// Description of the most recent failure
    fn get_error(&self) -> String;
}

/// Factory for fresh, unmounted sessions
pub trait Connector {
    type Client: NfsClient;

    /// Initialize a new session, `None` if no session could be allocated
    fn init_context(&self) -> Option<Self::Client>;
}

impl<T: Connector + ?Sized> Connector for &T {
    type Client = T::Client;

    fn init_context(&self) -> Option<Self::Client> {
        (**self).init_context()
    }
}
