use thiserror::Error;

/// Main error type for nfsio operations
#[derive(Error, Debug)]
pub enum NfsError {
    /// Negative status reported by the client library
    #[error("[Errno {errno}] {message}")]
    Io { errno: i32, message: String },

    #[error("I/O operation on closed file")]
    Closed,

    #[error("Trying to {operation} on file open for reading")]
    NotWritable { operation: &'static str },

    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Mount context has been unmounted")]
    Unmounted,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Unknown codec: {0}")]
    Codec(String),

    #[error("Cannot encode text with codec {0}")]
    Encode(String),

    #[error("Cannot decode data with codec {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NfsError {
    /// Build an I/O error from a negative client status
    pub fn from_status(status: i64, message: impl Into<String>) -> Self {
        NfsError::Io {
            errno: status.saturating_neg().clamp(0, i32::MAX as i64) as i32,
            message: message.into(),
        }
    }

    /// OS-style error number, if this error came from the client library
    pub fn errno(&self) -> Option<i32> {
        match self {
            NfsError::Io { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// Check if the error is a misuse of a handle or context
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            NfsError::Closed
                | NfsError::NotWritable { .. }
                | NfsError::InvalidMode(_)
                | NfsError::Unmounted
        )
    }

    /// Check if the error was raised while establishing a context
    pub fn is_resource(&self) -> bool {
        matches!(self, NfsError::InvalidUrl(_) | NfsError::Session(_))
    }

    /// Closest `std::io::ErrorKind` for this error
    pub fn kind(&self) -> std::io::ErrorKind {
        use std::io::ErrorKind;

        match self {
            NfsError::Io { errno, .. } => std::io::Error::from_raw_os_error(*errno).kind(),
            NfsError::Closed | NfsError::Unmounted => ErrorKind::BrokenPipe,
            NfsError::NotWritable { .. } => ErrorKind::PermissionDenied,
            NfsError::InvalidMode(_) | NfsError::InvalidUrl(_) | NfsError::Codec(_) => {
                ErrorKind::InvalidInput
            }
            NfsError::Encode(_) | NfsError::Decode(_) => ErrorKind::InvalidData,
            NfsError::Session(_) => ErrorKind::NotConnected,
            NfsError::Configuration(_) => ErrorKind::Other,
        }
    }
}

/// Result type alias for nfsio operations
pub type Result<T> = std::result::Result<T, NfsError>;

/// The `NfsError` rides along as the inner error, so the session message and
/// errno survive the conversion.
impl From<NfsError> for std::io::Error {
    fn from(error: NfsError) -> Self {
        std::io::Error::new(error.kind(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_negates_code() {
        let err = NfsError::from_status(-(libc::ENOENT as i64), "No such file or directory");
        assert_eq!(err.errno(), Some(libc::ENOENT));
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            format!("[Errno {}] No such file or directory", libc::ENOENT)
        );
    }

    #[test]
    fn test_error_groups() {
        assert!(NfsError::Closed.is_usage());
        assert!(NfsError::NotWritable { operation: "write" }.is_usage());
        assert!(!NfsError::Closed.is_resource());
        assert!(NfsError::Session("mount failed".into()).is_resource());
        assert!(NfsError::from_status(-5, "io").errno().is_some());
        assert!(NfsError::Closed.errno().is_none());
    }

    #[test]
    fn test_not_writable_message() {
        let err = NfsError::NotWritable { operation: "truncate" };
        assert_eq!(err.to_string(), "Trying to truncate on file open for reading");
    }

    #[test]
    fn test_into_io_error_keeps_errno_and_message() {
        let io: std::io::Error =
            NfsError::from_status(-(libc::EACCES as i64), "open call failed: denied").into();
        assert_eq!(io.kind(), std::io::ErrorKind::PermissionDenied);
        assert!(io.to_string().contains("open call failed: denied"));

        let inner = io.get_ref().and_then(|e| e.downcast_ref::<NfsError>());
        assert_eq!(inner.and_then(NfsError::errno), Some(libc::EACCES));

        let io: std::io::Error = NfsError::Closed.into();
        assert_eq!(io.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
