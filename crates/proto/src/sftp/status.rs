//! Translation of backend errors into SFTP status replies.
//!
//! Only `SftpWsError::Status` carries a message meant for the peer. Every
//! other error is reduced to a code and a fixed message so that backend
//! details (paths, OS error strings) never leave the server.

use super::message::Response;
use super::types::StatusCode;
use sftpws_platform::SftpWsError;
use std::io;

/// A status code paired with the message sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpStatus {
    /// Status code
    pub code: StatusCode,
    /// Message for the client
    pub message: String,
}

impl SftpStatus {
    /// Creates a status.
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// SSH_FX_OK with the conventional "OK" message.
    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "OK")
    }

    /// SSH_FX_EOF.
    pub fn eof() -> Self {
        Self::new(StatusCode::Eof, StatusCode::Eof.message())
    }

    /// SSH_FX_OP_UNSUPPORTED.
    pub fn unsupported() -> Self {
        Self::new(StatusCode::OpUnsupported, StatusCode::OpUnsupported.message())
    }

    /// Maps an error to the status reported to the client.
    pub fn from_error(err: &SftpWsError) -> Self {
        match err {
            SftpWsError::Status { code, description } => Self {
                code: StatusCode::from_u32(*code).unwrap_or(StatusCode::Failure),
                message: description.clone(),
            },
            SftpWsError::Io(e) => Self::from_io(e),
            SftpWsError::InvalidHandle => Self::new(StatusCode::Failure, "Invalid handle"),
            SftpWsError::ReadOnly => Self::new(StatusCode::Failure, "Internal server error"),
            SftpWsError::NotImplemented(_) => Self::unsupported(),
            _ => Self::new(StatusCode::Failure, "Unknown error"),
        }
    }

    fn from_io(err: &io::Error) -> Self {
        if let Some(status) = err.raw_os_error().and_then(from_errno) {
            return status;
        }

        match err.kind() {
            io::ErrorKind::NotFound => Self::new(StatusCode::NoSuchFile, "No such file"),
            io::ErrorKind::PermissionDenied => {
                Self::new(StatusCode::PermissionDenied, "Permission denied")
            }
            io::ErrorKind::AlreadyExists => Self::new(StatusCode::Failure, "File exists"),
            io::ErrorKind::Unsupported => Self::unsupported(),
            io::ErrorKind::InvalidInput => Self::new(StatusCode::BadMessage, "Invalid argument"),
            _ => Self::new(StatusCode::Failure, "Unknown error"),
        }
    }

    /// Returns the STATUS reply for this status.
    pub fn into_response(self) -> Response {
        Response::Status {
            code: self.code as u32,
            message: self.message,
        }
    }
}

#[cfg(unix)]
fn from_errno(errno: i32) -> Option<SftpStatus> {
    let (code, message) = match errno {
        libc::ENOENT | libc::ENOTDIR => (StatusCode::NoSuchFile, "No such file"),
        libc::EACCES | libc::EPERM | libc::EROFS => {
            (StatusCode::PermissionDenied, "Permission denied")
        }
        libc::EEXIST => (StatusCode::Failure, "File exists"),
        libc::EISDIR => (StatusCode::Failure, "Is a directory"),
        libc::ENOTEMPTY => (StatusCode::Failure, "Directory not empty"),
        libc::ENOSPC => (StatusCode::Failure, "No space left on device"),
        libc::EBADF => (StatusCode::Failure, "Invalid handle"),
        libc::EINVAL => (StatusCode::BadMessage, "Invalid argument"),
        libc::ENAMETOOLONG => (StatusCode::BadMessage, "File name too long"),
        libc::ENOSYS | libc::EOPNOTSUPP => (StatusCode::OpUnsupported, "Operation not supported"),
        libc::ELOOP => (StatusCode::Failure, "Too many symbolic links"),
        libc::EXDEV => (StatusCode::Failure, "Cross-device link"),
        _ => return None,
    };
    Some(SftpStatus::new(code, message))
}

#[cfg(not(unix))]
fn from_errno(_errno: i32) -> Option<SftpStatus> {
    None
}
