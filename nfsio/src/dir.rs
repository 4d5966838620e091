use crate::status::check_status;
use nfsio_client::{NfsClient, NfsDirent};
use nfsio_common::{NfsError, Result};
use tracing::trace;

/// An open directory stream.
///
/// Yields entries in the order the server returns them and closes the
/// stream exactly once, when exhausted or dropped.
pub struct DirCursor<'a, C: NfsClient> {
    client: &'a C,
    path: String,
    dir: Option<C::Dir>,
}

impl<'a, C: NfsClient> DirCursor<'a, C> {
    pub(crate) fn open(client: &'a C, path: &str) -> Result<Self> {
        let mut dir = None;
        let status = client.opendir(path, &mut dir);
        check_status(client, status)?;

        let dir = dir.ok_or_else(|| NfsError::Io {
            errno: libc::EIO,
            message: format!("opendir returned no stream for {}", path),
        })?;
        trace!("Opened directory stream for {}", path);

        Ok(Self {
            client,
            path: path.to_string(),
            dir: Some(dir),
        })
    }

    /// Path the stream was opened on
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the stream now rather than at drop
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            self.client.closedir(dir);
            trace!("Closed directory stream for {}", self.path);
        }
    }
}

impl<C: NfsClient> Iterator for DirCursor<'_, C> {
    type Item = NfsDirent;

    fn next(&mut self) -> Option<NfsDirent> {
        let dir = self.dir.as_mut()?;
        let entry = self.client.readdir(dir);
        if entry.is_none() {
            self.release();
        }
        entry
    }
}

impl<C: NfsClient> Drop for DirCursor<'_, C> {
    fn drop(&mut self) {
        self.release();
    }
}
