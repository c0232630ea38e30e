//! Error types for sftpws

use std::fmt;

/// Unified error type for all sftpws operations
#[derive(Debug)]
pub enum SftpWsError {
    /// I/O error (backend filesystem or socket)
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Framing or protocol violation; fatal for the connection
    Protocol(String),

    /// Operation failed with an SFTP status.
    ///
    /// Produced on the client when the peer answers with a non-OK STATUS, and
    /// by backends that want their message forwarded verbatim.
    Status {
        /// SFTP status code (SSH_FX_*)
        code: u32,
        /// Human-readable description
        description: String,
    },

    /// Handle is unknown, already closed, or belongs to another session
    InvalidHandle,

    /// Mutating operation attempted on a read-only filesystem
    ReadOnly,

    /// Caller supplied an argument the protocol cannot carry
    InvalidInput(String),

    /// The session or channel has been closed
    Closed,

    /// Not implemented
    NotImplemented(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl SftpWsError {
    /// Creates a status error with the given code and description.
    pub fn status(code: u32, description: impl Into<String>) -> Self {
        SftpWsError::Status {
            code,
            description: description.into(),
        }
    }

    /// Returns the SFTP status code carried by a `Status` error.
    pub fn status_code(&self) -> Option<u32> {
        match self {
            SftpWsError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true for errors that end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SftpWsError::Protocol(_) | SftpWsError::Closed)
    }
}

impl fmt::Display for SftpWsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SftpWsError::Io(e) => write!(f, "IO error: {}", e),
            SftpWsError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SftpWsError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SftpWsError::Status { code, description } => {
                write!(f, "SFTP error {}: {}", code, description)
            }
            SftpWsError::InvalidHandle => write!(f, "Invalid handle"),
            SftpWsError::ReadOnly => write!(f, "Filesystem is read-only"),
            SftpWsError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            SftpWsError::Closed => write!(f, "Session closed"),
            SftpWsError::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            SftpWsError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for SftpWsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SftpWsError::Io(e) => Some(e),
            SftpWsError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SftpWsError {
    fn from(err: std::io::Error) -> Self {
        SftpWsError::Io(err)
    }
}

/// Result type for sftpws operations
pub type SftpWsResult<T> = Result<T, SftpWsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SftpWsError::Config("virtual root must be absolute".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: virtual root must be absolute"
        );

        let err = SftpWsError::status(2, "No such file");
        assert_eq!(err.to_string(), "SFTP error 2: No such file");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SftpWsError = io_err.into();
        assert!(matches!(err, SftpWsError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_status_code_accessor() {
        assert_eq!(SftpWsError::status(4, "Failure").status_code(), Some(4));
        assert_eq!(SftpWsError::InvalidHandle.status_code(), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SftpWsError::Protocol("bad frame".into()).is_fatal());
        assert!(SftpWsError::Closed.is_fatal());
        assert!(!SftpWsError::status(1, "EOF").is_fatal());
        assert!(!SftpWsError::ReadOnly.is_fatal());
    }
}
