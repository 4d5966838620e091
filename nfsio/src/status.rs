use nfsio_client::NfsClient;
use nfsio_common::{NfsError, Result};
use tracing::debug;

/// Translate a primitive's signed status into a result.
///
/// Non-negative statuses are returned as the success value (a byte count or
/// zero). Negative statuses become [`NfsError::Io`] carrying `-status` and
/// the session's last error message.
pub fn check_status<C>(client: &C, status: impl Into<i64>) -> Result<u64>
where
    C: NfsClient + ?Sized,
{
    let status = status.into();
    if status >= 0 {
        return Ok(status as u64);
    }

    let message = client.get_error();
    debug!("Primitive failed with status {}: {}", status, message);
    Err(NfsError::from_status(status, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfsio_client::{Connector, MemoryServer, NfsStat64};

    #[test]
    fn test_success_passes_value_through() {
        let server = MemoryServer::new();
        let client = server.init_context().unwrap();
        assert_eq!(check_status(&client, 0).unwrap(), 0);
        assert_eq!(check_status(&client, 4096i64).unwrap(), 4096);
    }

    #[test]
    fn test_failure_carries_errno_and_message() {
        let server = MemoryServer::new();
        server.add_export("filer", "/export");
        let client = server.init_context().unwrap();
        assert_eq!(client.mount("filer", "/export"), 0);

        let mut st = NfsStat64::default();
        let status = client.stat64("/missing", &mut st);
        let err = check_status(&client, status).unwrap_err();

        assert_eq!(err.errno(), Some(libc::ENOENT));
        match err {
            NfsError::Io { message, .. } => assert!(message.contains("/missing")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
