//! File handles over an open remote file.

use crate::mode::AccessMode;
use crate::mount::MountContext;
use crate::stat::StatRecord;
use crate::status::check_status;
use bytes::Bytes;
use nfsio_client::protocol::whence;
use nfsio_client::{Connector, NfsClient, NfsStat64};
use nfsio_common::utils::url::split_file_url;
use nfsio_common::{Codec, MountOptions, NfsError, Result};
use std::borrow::Cow;
use std::io;
use tracing::{debug, trace, warn};

/// Data moved through a file handle: text for text framing, bytes for binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Bytes),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Bytes(_) => None,
        }
    }

    /// Raw bytes; text is returned as its UTF-8 form
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Text(text) => Bytes::from(text),
            Payload::Bytes(bytes) => bytes,
        }
    }

    /// Length in bytes (UTF-8 bytes for text)
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&[u8]> for Payload {
    fn from(data: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(data))
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(data: &[u8; N]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(data))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Bytes(data)
    }
}

/// Sized reads above this are capped at the bytes left in the file
const DIRECT_READ_LIMIT: u64 = 1 << 20;

/// Zeroed read buffer; allocation failure is an error, not an abort
fn alloc_buffer(size: u64) -> Result<Vec<u8>> {
    let no_memory = || NfsError::Io {
        errno: libc::ENOMEM,
        message: format!("Cannot allocate a {} byte read buffer", size),
    };

    let len = usize::try_from(size).map_err(|_| no_memory())?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| no_memory())?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Reference point for [`FileHandle::seek`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Whence {
    Start,
    #[default]
    Current,
    End,
}

impl Whence {
    fn raw(self) -> i32 {
        match self {
            Whence::Start => whence::SEEK_SET,
            Whence::Current => whence::SEEK_CUR,
            Whence::End => whence::SEEK_END,
        }
    }
}

/// Common surface of stream-like remote files
pub trait RemoteStream: io::Read + io::Write + io::Seek {
    /// Name the stream was opened with
    fn name(&self) -> &str;

    fn closed(&self) -> bool;

    /// Flush pending writes if any and release the stream
    fn close(&mut self);
}

enum Binding<'a, C: NfsClient> {
    /// Session owned by a caller's mount context
    Shared(&'a MountContext<C>),
    /// Session created for this handle alone, released on close
    Private(Option<MountContext<C>>),
}

impl<C: NfsClient> Binding<'_, C> {
    fn context(&self) -> Result<&MountContext<C>> {
        match self {
            Binding::Shared(ctx) => Ok(*ctx),
            Binding::Private(Some(ctx)) => Ok(ctx),
            Binding::Private(None) => Err(NfsError::Unmounted),
        }
    }

    fn client(&self) -> Result<&C> {
        self.context()?.client()
    }

    fn release(&mut self) {
        if let Binding::Private(ctx) = self {
            if let Some(mut ctx) = ctx.take() {
                ctx.unmount();
            }
        }
    }
}

/// An open remote file.
///
/// Reads and writes move [`Payload`]s: text through the handle's codec, or
/// raw bytes when opened with `b`. Dropping the handle closes it.
pub struct FileHandle<'a, C: NfsClient> {
    binding: Binding<'a, C>,
    file: Option<C::File>,
    name: String,
    mode: AccessMode,
    codec: Codec,
    closed: bool,
    dirty: bool,
    /// Session error captured when a private session is released
    last_error: Option<String>,
}

impl<'a, C: NfsClient> FileHandle<'a, C> {
    pub(crate) fn open_in(ctx: &'a MountContext<C>, path: &str, mode: &str, codec: Option<&str>) -> Result<Self> {
        Self::open_bound(Binding::Shared(ctx), path, path, mode, codec)
    }

    /// Open a file named by a full `nfs://server/export/.../name` URL on a
    /// session of its own
    pub fn open_url<K>(
        connector: K,
        url: &str,
        mode: &str,
        codec: Option<&str>,
        options: MountOptions,
    ) -> Result<Self>
    where
        K: Connector<Client = C>,
    {
        let (dir, path) = split_file_url(url)?;
        let ctx = MountContext::with_options(connector, &dir, options)?;
        Self::open_bound(Binding::Private(Some(ctx)), url, &path, mode, codec)
    }

    fn open_bound(
        binding: Binding<'a, C>,
        name: &str,
        path: &str,
        mode: &str,
        codec: Option<&str>,
    ) -> Result<Self> {
        let mode = AccessMode::parse(mode)?;

        let (codec, file) = {
            let ctx = binding.context()?;
            let options = ctx.options();
            let codec = match codec {
                Some(label) => Codec::from_label(label)?,
                None => Codec::from_optional_label(options.default_codec.as_deref())?,
            };

            let client = ctx.client()?;
            let flags = mode.flags();
            let mut fh = None;
            let status = if mode.exclusive() {
                client.create(path, flags, options.create_mode, &mut fh)
            } else {
                let status = client.open(path, flags, &mut fh);
                if status == -libc::ENOENT && mode.creates() {
                    debug!("{} does not exist, creating", path);
                    client.create(path, flags, options.create_mode, &mut fh)
                } else {
                    status
                }
            };
            check_status(client, status)?;

            let file = fh.ok_or_else(|| NfsError::Io {
                errno: libc::EIO,
                message: format!("open returned no handle for {}", path),
            })?;
            (codec, file)
        };

        debug!("Opened {} with mode {} ({:?})", name, mode, codec);
        Ok(Self {
            binding,
            file: Some(file),
            name: name.to_string(),
            mode,
            codec,
            closed: false,
            dirty: false,
            last_error: None,
        })
    }

    /// Session and open file for a primitive call
    fn io(&mut self) -> Result<(&C, &mut C::File)> {
        if self.closed {
            return Err(NfsError::Closed);
        }
        let client = self.binding.client()?;
        let file = self.file.as_mut().ok_or(NfsError::Closed)?;
        Ok((client, file))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(NfsError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<()> {
        if self.mode.writable() {
            Ok(())
        } else {
            Err(NfsError::NotWritable { operation })
        }
    }

    /// Write a payload at the current offset, returning the bytes written.
    ///
    /// Text is encoded with the handle's codec, bytes are sent unchanged.
    pub fn write(&mut self, data: impl Into<Payload>) -> Result<usize> {
        self.ensure_open()?;
        self.ensure_writable("write")?;

        let payload = data.into();
        let codec = self.codec;
        let bytes: Cow<'_, [u8]> = match &payload {
            Payload::Text(text) => codec.encode(text)?,
            Payload::Bytes(bytes) => Cow::Borrowed(&bytes[..]),
        };

        let count = self.write_bytes(&bytes)?;
        Ok(count)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        let (client, file) = self.io()?;
        let status = client.write(file, buf);
        let count = check_status(client, status)?;
        self.dirty = true;
        trace!("Wrote {} bytes to {}", count, self.name);
        Ok(count as usize)
    }

    /// Read `size` bytes, or everything from the offset to the end when
    /// `size` is `None`. Fewer bytes come back at end of file.
    pub fn read(&mut self, size: Option<u64>) -> Result<Payload> {
        self.ensure_open()?;

        let size = match size {
            Some(size) if size <= DIRECT_READ_LIMIT => size,
            Some(size) => size.min(self.remaining()?),
            None => self.remaining()?,
        };

        let mut buf = alloc_buffer(size)?;
        let count = self.read_into(&mut buf)?;
        buf.truncate(count);

        if self.mode.binary {
            Ok(Payload::Bytes(Bytes::from(buf)))
        } else {
            let text = self.codec.decode(&buf)?.into_owned();
            Ok(Payload::Text(text))
        }
    }

    /// Bytes between the current offset and the end of file
    fn remaining(&mut self) -> Result<u64> {
        let offset = self.tell()?;
        let st = self.fstat()?;
        Ok(st.size.saturating_sub(offset))
    }

    /// Read raw bytes into `buf`, returning how many were filled
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (client, file) = self.io()?;
        let status = client.read(file, buf);
        let count = check_status(client, status)? as usize;
        Ok(count.min(buf.len()))
    }

    pub fn fstat(&mut self) -> Result<StatRecord> {
        let (client, file) = self.io()?;
        let mut st = NfsStat64::default();
        let status = client.fstat64(file, &mut st);
        check_status(client, status)?;
        Ok(StatRecord::from(&st))
    }

    /// Current offset
    pub fn tell(&mut self) -> Result<u64> {
        self.seek(0, Whence::Current)
    }

    /// Move the offset, returning the new absolute position
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let (client, file) = self.io()?;
        let mut position = 0u64;
        let status = client.lseek(file, offset, whence.raw(), &mut position);
        check_status(client, status)?;
        Ok(position)
    }

    /// Set the file length to `size`, or to the current offset when `None`
    pub fn truncate(&mut self, size: Option<u64>) -> Result<()> {
        self.ensure_open()?;
        self.ensure_writable("truncate")?;

        let size = match size {
            Some(size) => size,
            None => self.tell()?,
        };

        let (client, file) = self.io()?;
        let status = client.ftruncate(file, size);
        check_status(client, status)?;
        Ok(())
    }

    /// Commit written data to the server
    pub fn flush(&mut self) -> Result<()> {
        let (client, file) = self.io()?;
        let status = client.fsync(file);
        check_status(client, status)?;
        self.dirty = false;
        Ok(())
    }

    /// Close the handle. A pending flush is attempted first; its failure
    /// is logged and otherwise ignored. Closing twice does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        if self.dirty {
            if let Err(e) = self.flush() {
                warn!("Flush before closing {} failed: {}", self.name, e);
            }
        }

        if let Some(mut file) = self.file.take() {
            match self.binding.client() {
                Ok(client) => {
                    let status = client.close(&mut file);
                    if status < 0 {
                        warn!("Closing {} failed: {}", self.name, client.get_error());
                    }
                }
                Err(e) => warn!("Closing {} without a session: {}", self.name, e),
            }
        }

        self.closed = true;
        if let Ok(client) = self.binding.client() {
            self.last_error = Some(client.get_error());
        }
        self.binding.release();
        debug!("Closed {}", self.name);
    }

    /// Inode number of the open file
    pub fn fileno(&mut self) -> Result<u64> {
        Ok(self.fstat()?.ino)
    }

    /// Remote files are never terminals
    pub fn isatty(&self) -> bool {
        false
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn readable(&self) -> bool {
        self.mode.readable()
    }

    pub fn writable(&self) -> bool {
        self.mode.writable()
    }

    /// Whether data has been written since the last successful flush
    pub fn needs_flush(&self) -> bool {
        self.dirty
    }

    /// Last error message of the bound session.
    ///
    /// After closing a handle that owned its session, this is the message the
    /// session held when it was released.
    pub fn error(&self) -> String {
        match self.binding.client() {
            Ok(client) => client.get_error(),
            Err(_) => self.last_error.clone().unwrap_or_default(),
        }
    }
}

impl<C: NfsClient> Drop for FileHandle<'_, C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: NfsClient> std::fmt::Debug for FileHandle<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("codec", &self.codec)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<C: NfsClient> io::Read for FileHandle<'_, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl<C: NfsClient> io::Write for FileHandle<'_, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_open()?;
        self.ensure_writable("write")?;
        Ok(self.write_bytes(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(FileHandle::flush(self)?)
    }
}

impl<C: NfsClient> io::Seek for FileHandle<'_, C> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(offset) => {
                let offset = i64::try_from(offset)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek offset too large"))?;
                (offset, Whence::Start)
            }
            io::SeekFrom::Current(offset) => (offset, Whence::Current),
            io::SeekFrom::End(offset) => (offset, Whence::End),
        };
        Ok(FileHandle::seek(self, offset, whence)?)
    }
}

impl<C: NfsClient> RemoteStream for FileHandle<'_, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        FileHandle::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfsio_client::{MemoryServer, Primitive};
    use std::io::{Read, Seek, SeekFrom, Write};

    fn mounted() -> (MemoryServer, MountContext<nfsio_client::MemoryClient>) {
        let server = MemoryServer::new();
        server.add_export("filer", "/export");
        server.seed_file("filer", "/export", "/a.txt", b"hello").unwrap();
        let ctx = MountContext::new(server.clone(), "nfs://filer/export").unwrap();
        (server, ctx)
    }

    #[test]
    fn test_text_read_decodes() {
        let (_server, ctx) = mounted();
        let mut fh = ctx.open("/a.txt", "r", None).unwrap();

        assert_eq!(fh.read(None).unwrap(), Payload::Text("hello".to_string()));
        assert_eq!(fh.read(None).unwrap(), Payload::Text(String::new()));
    }

    #[test]
    fn test_alloc_buffer_reports_enomem() {
        assert_eq!(alloc_buffer(16).unwrap(), vec![0u8; 16]);

        let err = alloc_buffer(u64::MAX).unwrap_err();
        assert_eq!(err.errno(), Some(libc::ENOMEM));
    }

    #[test]
    fn test_binary_read_returns_bytes() {
        let (_server, ctx) = mounted();
        let mut fh = ctx.open("/a.txt", "rb", None).unwrap();

        assert_eq!(fh.read(Some(2)).unwrap(), Payload::Bytes(Bytes::from_static(b"he")));
        assert_eq!(fh.tell().unwrap(), 2);
    }

    #[test]
    fn test_write_requires_writable_mode() {
        let (_server, ctx) = mounted();
        let mut fh = ctx.open("/a.txt", "r", None).unwrap();

        let err = fh.write("x").unwrap_err();
        assert!(matches!(err, NfsError::NotWritable { operation: "write" }));
        let err = fh.truncate(Some(0)).unwrap_err();
        assert!(matches!(err, NfsError::NotWritable { operation: "truncate" }));
    }

    #[test]
    fn test_close_flushes_dirty_handle() {
        let (server, ctx) = mounted();
        let mut fh = ctx.open("/b.txt", "w", None).unwrap();
        fh.write("data").unwrap();
        assert!(fh.needs_flush());

        fh.close();
        assert!(fh.closed());
        assert_eq!(server.stats().fsync_calls, 1);
        assert_eq!(server.stats().files_open, 0);
    }

    #[test]
    fn test_close_swallows_flush_failure() {
        let (server, ctx) = mounted();
        let mut fh = ctx.open("/b.txt", "w", None).unwrap();
        fh.write("data").unwrap();

        server.inject_fault(Primitive::Fsync, libc::EIO);
        fh.close();
        assert!(fh.closed());
        assert_eq!(server.stats().files_open, 0);
    }

    #[test]
    fn test_std_io_traits() {
        let (server, ctx) = mounted();
        let mut fh = ctx.open("/a.txt", "r+b", None).unwrap();

        Seek::seek(&mut fh, SeekFrom::End(0)).unwrap();
        fh.write_all(b" world").unwrap();
        Write::flush(&mut fh).unwrap();
        fh.rewind().unwrap();

        let mut contents = String::new();
        fh.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello world");
        drop(fh);

        assert_eq!(server.file_contents("filer", "/export", "/a.txt").unwrap(), b"hello world");
    }
}
