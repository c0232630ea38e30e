//! Filesystem backend abstraction.
//!
//! The server never touches storage directly. Every request is routed
//! through [`SafeFilesystem`](super::safe::SafeFilesystem) to an
//! implementation of [`FileSystem`], which sees real paths and its own handle
//! type.

use super::types::{FileAttributes, NameEntry, OpenFlags};
use bytes::Bytes;
use sftpws_platform::{SftpWsError, SftpWsResult};

/// Storage backend for an SFTP server.
///
/// Paths passed to the backend are already confined to the virtual root.
/// Errors are translated to SFTP status codes by
/// [`SftpStatus::from_error`](super::status::SftpStatus::from_error); return
/// `SftpWsError::Status` to send a specific message to the client.
///
/// # Example
///
/// ```rust,no_run
/// use sftpws_proto::sftp::{FileSystem, FileAttributes, NameEntry, OpenFlags};
/// use sftpws_platform::{SftpWsError, SftpWsResult};
/// use bytes::Bytes;
///
/// struct Empty;
///
/// #[async_trait::async_trait]
/// impl FileSystem for Empty {
///     type Handle = ();
///
///     async fn open(&self, _: &str, _: OpenFlags, _: &FileAttributes) -> SftpWsResult<()> {
///         Err(SftpWsError::status(2, "No such file"))
///     }
///     async fn close(&self, _: &()) -> SftpWsResult<()> { Ok(()) }
///     async fn read(&self, _: &(), _: u64, _: u32) -> SftpWsResult<Bytes> { Ok(Bytes::new()) }
///     async fn write(&self, _: &(), _: u64, _: &[u8]) -> SftpWsResult<()> { Ok(()) }
///     async fn lstat(&self, p: &str) -> SftpWsResult<FileAttributes> { self.stat(p).await }
///     async fn stat(&self, _: &str) -> SftpWsResult<FileAttributes> {
///         Err(SftpWsError::status(2, "No such file"))
///     }
///     async fn fstat(&self, _: &()) -> SftpWsResult<FileAttributes> { Ok(FileAttributes::new()) }
///     async fn opendir(&self, _: &str) -> SftpWsResult<()> { Ok(()) }
///     async fn readdir(&self, _: &()) -> SftpWsResult<Option<Vec<NameEntry>>> { Ok(None) }
///     async fn unlink(&self, _: &str) -> SftpWsResult<()> { Ok(()) }
///     async fn mkdir(&self, _: &str, _: &FileAttributes) -> SftpWsResult<()> { Ok(()) }
///     async fn rmdir(&self, _: &str) -> SftpWsResult<()> { Ok(()) }
///     async fn realpath(&self, p: &str) -> SftpWsResult<String> { Ok(p.to_string()) }
///     async fn rename(&self, _: &str, _: &str) -> SftpWsResult<()> { Ok(()) }
/// }
/// ```
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync + 'static {
    /// Backend handle for open files and directories.
    type Handle: Send + Sync + 'static;

    /// Opens a file.
    async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: &FileAttributes,
    ) -> SftpWsResult<Self::Handle>;

    /// Releases a file or directory handle.
    async fn close(&self, handle: &Self::Handle) -> SftpWsResult<()>;

    /// Reads up to `length` bytes at `offset`. An empty result means end of
    /// file.
    async fn read(&self, handle: &Self::Handle, offset: u64, length: u32) -> SftpWsResult<Bytes>;

    /// Writes `data` at `offset`.
    async fn write(&self, handle: &Self::Handle, offset: u64, data: &[u8]) -> SftpWsResult<()>;

    /// Stats a path without following a final symlink.
    async fn lstat(&self, path: &str) -> SftpWsResult<FileAttributes>;

    /// Stats a path.
    async fn stat(&self, path: &str) -> SftpWsResult<FileAttributes>;

    /// Stats an open handle.
    async fn fstat(&self, handle: &Self::Handle) -> SftpWsResult<FileAttributes>;

    /// Applies attributes to a path.
    async fn setstat(&self, path: &str, attrs: &FileAttributes) -> SftpWsResult<()> {
        let _ = (path, attrs);
        Err(SftpWsError::NotImplemented("setstat".to_string()))
    }

    /// Applies attributes to an open handle.
    async fn fsetstat(&self, handle: &Self::Handle, attrs: &FileAttributes) -> SftpWsResult<()> {
        let _ = (handle, attrs);
        Err(SftpWsError::NotImplemented("fsetstat".to_string()))
    }

    /// Opens a directory for listing.
    async fn opendir(&self, path: &str) -> SftpWsResult<Self::Handle>;

    /// Returns the next batch of entries, or `None` once the listing is
    /// exhausted.
    async fn readdir(&self, handle: &Self::Handle) -> SftpWsResult<Option<Vec<NameEntry>>>;

    /// Removes a file.
    async fn unlink(&self, path: &str) -> SftpWsResult<()>;

    /// Creates a directory.
    async fn mkdir(&self, path: &str, attrs: &FileAttributes) -> SftpWsResult<()>;

    /// Removes an empty directory.
    async fn rmdir(&self, path: &str) -> SftpWsResult<()>;

    /// Canonicalizes a path.
    async fn realpath(&self, path: &str) -> SftpWsResult<String>;

    /// Renames a file or directory.
    async fn rename(&self, old_path: &str, new_path: &str) -> SftpWsResult<()>;

    /// Reads a symlink target.
    async fn readlink(&self, path: &str) -> SftpWsResult<String> {
        let _ = path;
        Err(SftpWsError::NotImplemented("readlink".to_string()))
    }

    /// Creates `link_path` pointing at `target_path`.
    async fn symlink(&self, target_path: &str, link_path: &str) -> SftpWsResult<()> {
        let _ = (target_path, link_path);
        Err(SftpWsError::NotImplemented("symlink".to_string()))
    }
}
