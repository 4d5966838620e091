//! Mount context: one session bound to one mounted export.

use crate::dir::DirCursor;
use crate::file::FileHandle;
use crate::stat::StatRecord;
use crate::status::check_status;
use nfsio_client::{Connector, NfsClient, NfsStat64};
use nfsio_common::{MountOptions, NfsError, NfsUrl, Result};
use tracing::{debug, info};

/// A mounted export.
///
/// Owns the client session and the parsed URL. Both are released when the
/// context is unmounted or dropped, the URL first.
pub struct MountContext<C: NfsClient> {
    url: Option<NfsUrl>,
    session: Option<C>,
    options: MountOptions,
}

impl<C: NfsClient> MountContext<C> {
    /// Mount the export named by `url` with default options
    pub fn new<K>(connector: K, url: &str) -> Result<Self>
    where
        K: Connector<Client = C>,
    {
        Self::with_options(connector, url, MountOptions::default())
    }

    pub fn with_options<K>(connector: K, url: &str, options: MountOptions) -> Result<Self>
    where
        K: Connector<Client = C>,
    {
        let session = connector
            .init_context()
            .ok_or_else(|| NfsError::Session("Failed to init context".to_string()))?;

        // From here on, an early return drops the context and releases
        // whatever was acquired so far.
        let mut context = Self {
            url: None,
            session: Some(session),
            options,
        };

        let parsed = {
            let session = context.client()?;
            session
                .parse_url_dir(url)
                .ok_or_else(|| NfsError::InvalidUrl(session.get_error()))?
        };

        debug!("Mounting {}:{}", parsed.server_address(), parsed.path);
        {
            let session = context.client()?;
            let status = session.mount(&parsed.server_address(), &parsed.path);
            check_status(session, status)?;
        }

        info!("Mounted {}:{}", parsed.server, parsed.path);
        context.url = Some(parsed);
        Ok(context)
    }

    /// The live session, or `Unmounted` once released
    pub(crate) fn client(&self) -> Result<&C> {
        self.session.as_ref().ok_or(NfsError::Unmounted)
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    pub fn url(&self) -> Option<&NfsUrl> {
        self.url.as_ref()
    }

    pub fn server(&self) -> Option<&str> {
        self.url.as_ref().map(|url| url.server.as_str())
    }

    pub fn export(&self) -> Option<&str> {
        self.url.as_ref().map(|url| url.path.as_str())
    }

    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    /// Open a file relative to the export root
    pub fn open(&self, path: &str, mode: &str, codec: Option<&str>) -> Result<FileHandle<'_, C>> {
        FileHandle::open_in(self, path, mode, codec)
    }

    /// Stat `path`, following symbolic links
    pub fn stat(&self, path: &str) -> Result<StatRecord> {
        let client = self.client()?;
        let mut st = NfsStat64::default();
        let status = client.stat64(path, &mut st);
        check_status(client, status)?;
        Ok(StatRecord::from(&st))
    }

    /// Stat `path` itself, without following a final symbolic link
    pub fn lstat(&self, path: &str) -> Result<StatRecord> {
        let client = self.client()?;
        let mut st = NfsStat64::default();
        let status = client.lstat64(path, &mut st);
        check_status(client, status)?;
        Ok(StatRecord::from(&st))
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        let client = self.client()?;
        let status = client.unlink(path);
        check_status(client, status)?;
        Ok(())
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        let client = self.client()?;
        let status = client.mkdir(path);
        check_status(client, status)?;
        Ok(())
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let client = self.client()?;
        let status = client.rmdir(path);
        check_status(client, status)?;
        Ok(())
    }

    /// Names in a directory, in server order.
    ///
    /// `.` and `..` are included unless `skip_dot_entries` is set.
    pub fn listdir(&self, path: &str) -> Result<Vec<String>> {
        let skip_dots = self.options.skip_dot_entries;
        let names = self
            .scandir(path)?
            .map(|entry| entry.name)
            .filter(|name| !(skip_dots && (name == "." || name == "..")))
            .collect();
        Ok(names)
    }

    /// Open a directory stream yielding full entries
    pub fn scandir(&self, path: &str) -> Result<DirCursor<'_, C>> {
        DirCursor::open(self.client()?, path)
    }

    /// Last error message recorded by the session, empty once unmounted
    pub fn error(&self) -> String {
        self.session
            .as_ref()
            .map(NfsClient::get_error)
            .unwrap_or_default()
    }

    /// Release the URL and then the session. Calling it again does nothing.
    pub fn unmount(&mut self) {
        if let Some(url) = self.url.take() {
            debug!("Releasing {}:{}", url.server, url.path);
        }
        if let Some(session) = self.session.take() {
            drop(session);
            debug!("Session destroyed");
        }
    }
}

impl<C: NfsClient> Drop for MountContext<C> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<C: NfsClient> std::fmt::Debug for MountContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountContext")
            .field("url", &self.url)
            .field("mounted", &self.session.is_some())
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfsio_client::{MemoryServer, Primitive};

    fn server() -> MemoryServer {
        let server = MemoryServer::new();
        server.add_export("filer", "/export");
        server.seed_file("filer", "/export", "/a.txt", b"alpha").unwrap();
        server.seed_dir("filer", "/export", "/docs").unwrap();
        server
    }

    #[test]
    fn test_mount_and_accessors() {
        let server = server();
        let ctx = MountContext::new(&server, "nfs://filer/export").unwrap();

        assert!(ctx.is_mounted());
        assert_eq!(ctx.server(), Some("filer"));
        assert_eq!(ctx.export(), Some("/export"));
        assert_eq!(server.stats().sessions_active, 1);
    }

    #[test]
    fn test_init_failure_is_session_error() {
        let server = server();
        server.limit_sessions(Some(0));

        let err = MountContext::new(&server, "nfs://filer/export").unwrap_err();
        assert!(matches!(err, NfsError::Session(_)));
    }

    #[test]
    fn test_bad_url_releases_session() {
        let server = server();
        let err = MountContext::new(&server, "http://filer/export").unwrap_err();

        assert!(matches!(err, NfsError::InvalidUrl(_)));
        assert_eq!(server.stats().sessions_active, 0);
    }

    #[test]
    fn test_mount_failure_releases_session() {
        let server = server();
        server.inject_fault(Primitive::Mount, libc::EACCES);

        let err = MountContext::new(&server, "nfs://filer/export").unwrap_err();
        assert_eq!(err.errno(), Some(libc::EACCES));
        assert_eq!(server.stats().sessions_active, 0);
    }

    #[test]
    fn test_unmount_is_idempotent() {
        let server = server();
        let mut ctx = MountContext::new(&server, "nfs://filer/export").unwrap();

        ctx.unmount();
        ctx.unmount();
        assert!(!ctx.is_mounted());
        assert_eq!(ctx.server(), None);
        assert_eq!(ctx.error(), "");
        assert!(matches!(ctx.stat("/a.txt"), Err(NfsError::Unmounted)));
        assert_eq!(server.stats().sessions_active, 0);
    }

    #[test]
    fn test_listdir_closes_stream() {
        let server = server();
        let ctx = MountContext::new(&server, "nfs://filer/export").unwrap();

        let names = ctx.listdir("/").unwrap();
        assert_eq!(names, vec![".", "..", "a.txt", "docs"]);
        assert_eq!(server.stats().dirs_open, 0);
    }

    #[test]
    fn test_scandir_dropped_early_closes_stream() {
        let server = server();
        let ctx = MountContext::new(&server, "nfs://filer/export").unwrap();

        let mut cursor = ctx.scandir("/").unwrap();
        assert_eq!(cursor.next().unwrap().name, ".");
        assert_eq!(server.stats().dirs_open, 1);
        drop(cursor);
        assert_eq!(server.stats().dirs_open, 0);
    }
}
