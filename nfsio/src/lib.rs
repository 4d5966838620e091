//! nfsio: file-like access to NFS exports.
//!
//! A [`MountContext`] mounts one export and offers path operations
//! (stat, listdir, mkdir, ...) plus [`MountContext::open`]. Files can also be
//! opened directly from a full URL with [`open`], in which case the handle
//! owns a session of its own.
//!
//! ```no_run
//! use nfsio::{MountContext, MemoryServer};
//!
//! # fn main() -> nfsio::Result<()> {
//! let server = MemoryServer::new();
//! server.add_export("filer", "/export");
//!
//! let ctx = MountContext::new(&server, "nfs://filer/export")?;
//! let mut fh = ctx.open("/notes.txt", "w", None)?;
//! fh.write("hello")?;
//! fh.close();
//! # Ok(())
//! # }
//! ```

pub mod dir;
pub mod file;
pub mod mode;
pub mod mount;
pub mod stat;
pub mod status;

pub use dir::DirCursor;
pub use file::{FileHandle, Payload, RemoteStream, Whence};
pub use mode::{AccessMode, BaseMode};
pub use mount::MountContext;
pub use stat::{StatRecord, Timespec};
pub use status::check_status;

pub use nfsio_client::{Connector, MemoryClient, MemoryServer, NfsClient, NfsDirent, Primitive};
#[cfg(feature = "libnfs")]
pub use nfsio_client::{LibnfsClient, LibnfsConnector};
pub use nfsio_common::{Codec, MountOptions, NfsConfig, NfsError, Result};

/// Open a file named by `nfs://server/export/.../name` on a private session.
///
/// `mode` is one of `r`, `w`, `a`, `x`, optionally followed by `+` and/or
/// `b`. Text framing uses `codec`, or the default codec when `None`.
pub fn open<'a, K>(
    connector: K,
    url: &str,
    mode: &str,
    codec: Option<&str>,
) -> Result<FileHandle<'a, K::Client>>
where
    K: Connector,
{
    open_with_options(connector, url, mode, codec, MountOptions::default())
}

/// Like [`open`], with explicit mount options
pub fn open_with_options<'a, K>(
    connector: K,
    url: &str,
    mode: &str,
    codec: Option<&str>,
    options: MountOptions,
) -> Result<FileHandle<'a, K::Client>>
where
    K: Connector,
{
    FileHandle::open_url(connector, url, mode, codec, options)
}
