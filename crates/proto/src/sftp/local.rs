//! Local disk backend.
//!
//! [`LocalFilesystem`] serves real paths through `tokio::fs`. It performs no
//! confinement of its own; wrap it in [`SafeFilesystem`](super::safe::SafeFilesystem)
//! before exposing it to clients.

use super::fs::FileSystem;
use super::types::{FileAttributes, FileMode, NameEntry, OpenFlags};
use bytes::Bytes;
use sftpws_platform::{SftpWsError, SftpWsResult};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions, ReadDir};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Default number of entries returned by one READDIR.
pub const DEFAULT_READDIR_BATCH: usize = 64;

/// Open file or directory cursor owned by [`LocalFilesystem`].
#[derive(Debug)]
pub enum DiskHandle {
    /// Open regular file
    File {
        /// Real path, used for path-based attribute updates
        path: PathBuf,
        /// File and its seek position
        file: Mutex<File>,
    },
    /// Directory listing in progress
    Directory {
        /// Real path
        path: PathBuf,
        /// Remaining entries; `None` once exhausted
        entries: Mutex<Option<ReadDir>>,
    },
}

impl DiskHandle {
    fn file(&self) -> SftpWsResult<(&Path, &Mutex<File>)> {
        match self {
            DiskHandle::File { path, file } => Ok((path, file)),
            DiskHandle::Directory { .. } => Err(SftpWsError::InvalidHandle),
        }
    }

    fn path(&self) -> &Path {
        match self {
            DiskHandle::File { path, .. } | DiskHandle::Directory { path, .. } => path,
        }
    }
}

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone)]
pub struct LocalFilesystem {
    batch_size: usize,
}

impl Default for LocalFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFilesystem {
    /// Creates a backend with the default READDIR batch size.
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_READDIR_BATCH,
        }
    }

    /// Sets how many entries one READDIR returns (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the READDIR batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Converts disk metadata into SFTP attributes.
pub fn attributes_from_metadata(meta: &std::fs::Metadata) -> FileAttributes {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        FileAttributes {
            size: Some(meta.size()),
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
            permissions: Some(meta.mode()),
            atime: Some(meta.atime() as u32),
            mtime: Some(meta.mtime() as u32),
        }
    }

    #[cfg(not(unix))]
    {
        let kind = if meta.is_dir() {
            FileMode::DIRECTORY | FileMode::DEFAULT_DIR
        } else if meta.file_type().is_symlink() {
            FileMode::SYMLINK | 0o777
        } else {
            FileMode::REGULAR | FileMode::DEFAULT_FILE
        };
        let permissions = if meta.permissions().readonly() {
            kind & !0o222
        } else {
            kind
        };
        let seconds = |time: io::Result<std::time::SystemTime>| {
            time.ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as u32)
        };
        let (atime, mtime) = match (seconds(meta.accessed()), seconds(meta.modified())) {
            (Some(a), Some(m)) => (Some(a), Some(m)),
            _ => (None, None),
        };
        FileAttributes {
            size: Some(meta.len()),
            uid: None,
            gid: None,
            permissions: Some(permissions),
            atime,
            mtime,
        }
    }
}

async fn blocking<T, F>(task: F) -> SftpWsResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| SftpWsError::Io(io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(SftpWsError::from)
}

/// Applies everything except the size, which needs a file handle.
async fn apply_path_attributes(path: &Path, attrs: &FileAttributes) -> SftpWsResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Some(mode) = attrs.permissions {
            fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).await?;
        }
        if let (Some(uid), Some(gid)) = (attrs.uid, attrs.gid) {
            let target = path.to_path_buf();
            blocking(move || std::os::unix::fs::chown(target, Some(uid), Some(gid))).await?;
        }
    }

    #[cfg(not(unix))]
    if let Some(mode) = attrs.permissions {
        let mut perms = fs::metadata(path).await?.permissions();
        perms.set_readonly(mode & 0o222 == 0);
        fs::set_permissions(path, perms).await?;
    }

    if let (Some(atime), Some(mtime)) = (attrs.atime, attrs.mtime) {
        let target = path.to_path_buf();
        blocking(move || {
            filetime::set_file_times(
                target,
                filetime::FileTime::from_unix_time(atime as i64, 0),
                filetime::FileTime::from_unix_time(mtime as i64, 0),
            )
        })
        .await?;
    }

    Ok(())
}

fn to_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait::async_trait]
impl FileSystem for LocalFilesystem {
    type Handle = DiskHandle;

    async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: &FileAttributes,
    ) -> SftpWsResult<DiskHandle> {
        let mut options = OpenOptions::new();
        options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .append(flags.contains(OpenFlags::APPEND))
            .truncate(flags.contains(OpenFlags::TRUNC));

        if flags.contains(OpenFlags::CREAT) {
            if flags.contains(OpenFlags::EXCL) {
                options.create_new(true);
            } else {
                options.create(true);
            }
        }

        #[cfg(unix)]
        options.mode(attrs.permissions.unwrap_or(FileMode::DEFAULT_FILE) & 0o7777);
        #[cfg(not(unix))]
        let _ = attrs;

        debug!(path, flags = %flags, "open");
        let file = options.open(path).await?;
        Ok(DiskHandle::File {
            path: PathBuf::from(path),
            file: Mutex::new(file),
        })
    }

    async fn close(&self, handle: &DiskHandle) -> SftpWsResult<()> {
        if let DiskHandle::File { file, .. } = handle {
            file.lock().await.flush().await?;
        }
        Ok(())
    }

    async fn read(&self, handle: &DiskHandle, offset: u64, length: u32) -> SftpWsResult<Bytes> {
        let (_, file) = handle.file()?;
        let mut file = file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = Vec::with_capacity(length as usize);
        (&mut *file).take(length as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn write(&self, handle: &DiskHandle, offset: u64, data: &[u8]) -> SftpWsResult<()> {
        let (_, file) = handle.file()?;
        let mut file = file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn lstat(&self, path: &str) -> SftpWsResult<FileAttributes> {
        Ok(attributes_from_metadata(&fs::symlink_metadata(path).await?))
    }

    async fn stat(&self, path: &str) -> SftpWsResult<FileAttributes> {
        Ok(attributes_from_metadata(&fs::metadata(path).await?))
    }

    async fn fstat(&self, handle: &DiskHandle) -> SftpWsResult<FileAttributes> {
        let meta = match handle {
            DiskHandle::File { file, .. } => file.lock().await.metadata().await?,
            DiskHandle::Directory { path, .. } => fs::metadata(path).await?,
        };
        Ok(attributes_from_metadata(&meta))
    }

    async fn setstat(&self, path: &str, attrs: &FileAttributes) -> SftpWsResult<()> {
        if let Some(size) = attrs.size {
            let file = OpenOptions::new().write(true).open(path).await?;
            file.set_len(size).await?;
        }
        apply_path_attributes(Path::new(path), attrs).await
    }

    async fn fsetstat(&self, handle: &DiskHandle, attrs: &FileAttributes) -> SftpWsResult<()> {
        if let Some(size) = attrs.size {
            let (_, file) = handle.file()?;
            file.lock().await.set_len(size).await?;
        }
        apply_path_attributes(handle.path(), attrs).await
    }

    async fn opendir(&self, path: &str) -> SftpWsResult<DiskHandle> {
        let entries = fs::read_dir(path).await?;
        Ok(DiskHandle::Directory {
            path: PathBuf::from(path),
            entries: Mutex::new(Some(entries)),
        })
    }

    async fn readdir(&self, handle: &DiskHandle) -> SftpWsResult<Option<Vec<NameEntry>>> {
        let DiskHandle::Directory { entries, .. } = handle else {
            return Err(SftpWsError::InvalidHandle);
        };

        let mut cursor = entries.lock().await;
        let Some(read_dir) = cursor.as_mut() else {
            return Ok(None);
        };

        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            match read_dir.next_entry().await? {
                Some(entry) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    // entries can vanish between listing and stat
                    let attrs = match entry.metadata().await {
                        Ok(meta) => attributes_from_metadata(&meta),
                        Err(_) => FileAttributes::new(),
                    };
                    batch.push(NameEntry::new(name, attrs));
                }
                None => {
                    *cursor = None;
                    break;
                }
            }
        }

        Ok(if batch.is_empty() { None } else { Some(batch) })
    }

    async fn unlink(&self, path: &str) -> SftpWsResult<()> {
        Ok(fs::remove_file(path).await?)
    }

    async fn mkdir(&self, path: &str, attrs: &FileAttributes) -> SftpWsResult<()> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(attrs.permissions.unwrap_or(FileMode::DEFAULT_DIR) & 0o7777);
        #[cfg(not(unix))]
        let _ = attrs;
        Ok(builder.create(path).await?)
    }

    async fn rmdir(&self, path: &str) -> SftpWsResult<()> {
        Ok(fs::remove_dir(path).await?)
    }

    async fn realpath(&self, path: &str) -> SftpWsResult<String> {
        // paths arrive normalized; only existence is checked
        fs::symlink_metadata(path).await?;
        Ok(path.to_string())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> SftpWsResult<()> {
        Ok(fs::rename(old_path, new_path).await?)
    }

    async fn readlink(&self, path: &str) -> SftpWsResult<String> {
        Ok(to_string(fs::read_link(path).await?))
    }

    #[cfg(unix)]
    async fn symlink(&self, target_path: &str, link_path: &str) -> SftpWsResult<()> {
        Ok(fs::symlink(target_path, link_path).await?)
    }
}
