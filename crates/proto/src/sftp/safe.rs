//! Path and handle virtualization.
//!
//! [`SafeFilesystem`] sits between the dispatcher and a [`FileSystem`]
//! backend. It confines every path to a virtual root, replaces backend
//! handles with small integer handles local to one session, and enforces
//! read-only mode.
//!
//! # Path Mapping
//!
//! ```text
//! root = /srv/files
//!
//! virtual                 real
//! /                   ->  /srv/files
//! /docs/../a.txt      ->  /srv/files/a.txt
//! /../../etc/passwd   ->  /srv/files/etc/passwd
//! ```

use super::config::SftpServerConfig;
use super::fs::FileSystem;
use super::types::{FileAttributes, NameEntry, OpenFlags};
use bytes::Bytes;
use sftpws_platform::{SftpWsError, SftpWsResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Free slots are only reused once the table has grown past this size.
const SLOT_REUSE_THRESHOLD: usize = 64;

/// Session-local handle: a table index offset by one, so zero is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalHandle(u32);

impl LocalHandle {
    /// Wire size of an encoded handle.
    pub const WIRE_LEN: usize = 4;

    /// Returns the raw value.
    pub fn value(self) -> u32 {
        self.0
    }

    /// Parses a wire handle.
    ///
    /// Anything that is not four bytes, or encodes zero, is an invalid handle.
    pub fn from_wire(bytes: &[u8]) -> SftpWsResult<Self> {
        let raw: [u8; Self::WIRE_LEN] = bytes.try_into().map_err(|_| SftpWsError::InvalidHandle)?;
        match u32::from_be_bytes(raw) {
            0 => Err(SftpWsError::InvalidHandle),
            value => Ok(Self(value)),
        }
    }

    /// Encodes the handle for the wire.
    pub fn to_wire(self) -> Bytes {
        Bytes::copy_from_slice(&self.0.to_be_bytes())
    }

    fn slot(self) -> usize {
        (self.0 - 1) as usize
    }
}

/// Growable arena of open backend handles.
#[derive(Debug)]
struct HandleTable<H> {
    slots: Vec<Option<Arc<H>>>,
    disposed: bool,
}

impl<H> HandleTable<H> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            disposed: false,
        }
    }

    fn insert(&mut self, handle: H) -> LocalHandle {
        let handle = Some(Arc::new(handle));
        if self.slots.len() > SLOT_REUSE_THRESHOLD {
            if let Some(slot) = self.slots.iter().position(Option::is_none) {
                self.slots[slot] = handle;
                return LocalHandle(slot as u32 + 1);
            }
        }
        self.slots.push(handle);
        LocalHandle(self.slots.len() as u32)
    }

    fn get(&self, handle: LocalHandle) -> SftpWsResult<Arc<H>> {
        self.slots
            .get(handle.slot())
            .and_then(Option::clone)
            .ok_or(SftpWsError::InvalidHandle)
    }

    fn remove(&mut self, handle: LocalHandle) -> SftpWsResult<Arc<H>> {
        self.slots
            .get_mut(handle.slot())
            .and_then(Option::take)
            .ok_or(SftpWsError::InvalidHandle)
    }

    fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Empties the table. Later inserts are refused.
    fn drain(&mut self) -> Vec<Arc<H>> {
        self.disposed = true;
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }
}

/// Resolves a symlink target against the directory holding `link`.
///
/// Both are virtual paths; the result is normalized and cannot leave `/`.
fn resolve_link_target(link: &str, target: &str) -> String {
    if target.starts_with('/') {
        return normalize_virtual(target);
    }
    let parent = match link.rfind('/') {
        Some(0) | None => "",
        Some(i) => &link[..i],
    };
    normalize_virtual(&format!("{}/{}", parent, target))
}

/// Owns a backend handle between `open` returning and the handle landing in
/// the table. If the owning task is cancelled in between, the handle is
/// closed on a background task.
struct OrphanGuard<F: FileSystem> {
    fs: Arc<F>,
    handle: Option<F::Handle>,
}

impl<F: FileSystem> Drop for OrphanGuard<F> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let fs = self.fs.clone();
            runtime.spawn(async move {
                let _ = fs.close(&handle).await;
            });
        }
    }
}

/// Normalizes a virtual path to an absolute path without `.` or `..`.
///
/// `..` at the top stays at the top, so the result never escapes `/`.
pub fn normalize_virtual(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        let mut out = String::with_capacity(path.len() + 1);
        for segment in segments {
            out.push('/');
            out.push_str(segment);
        }
        out
    }
}

/// Sandboxed view of a [`FileSystem`] for one session.
pub struct SafeFilesystem<F: FileSystem> {
    fs: Arc<F>,
    root: String,
    read_only: bool,
    handles: Mutex<HandleTable<F::Handle>>,
}

impl<F: FileSystem> std::fmt::Debug for SafeFilesystem<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeFilesystem")
            .field("root", &self.root)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl<F: FileSystem> SafeFilesystem<F> {
    /// Wraps `fs`, confining it to `root`.
    ///
    /// # Errors
    ///
    /// Returns [`SftpWsError::Config`] if `root` is not absolute.
    pub fn new(fs: Arc<F>, root: &str, read_only: bool) -> SftpWsResult<Self> {
        if !root.starts_with('/') {
            return Err(SftpWsError::Config(format!(
                "Virtual root must be an absolute path: {}",
                root
            )));
        }

        Ok(Self {
            fs,
            root: normalize_virtual(root),
            read_only,
            handles: Mutex::new(HandleTable::new()),
        })
    }

    /// Wraps `fs` using the root and mode from `config`.
    pub fn from_config(fs: Arc<F>, config: &SftpServerConfig) -> SftpWsResult<Self> {
        Self::new(fs, &config.virtual_root, config.read_only)
    }

    /// Returns the real path of the virtual root.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns true if mutating operations are refused.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Maps a client path to a real path inside the root.
    pub fn to_real_path(&self, path: &str) -> String {
        let virtual_path = normalize_virtual(path);
        if self.root == "/" {
            virtual_path
        } else if virtual_path == "/" {
            self.root.clone()
        } else {
            format!("{}{}", self.root, virtual_path)
        }
    }

    /// Maps a real path back to the client's view. Paths outside the root
    /// become `/`.
    pub fn to_virtual_path(&self, real: &str) -> String {
        if self.root == "/" {
            return normalize_virtual(real);
        }
        match real.strip_prefix(self.root.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => normalize_virtual(rest),
            _ => "/".to_string(),
        }
    }

    /// Returns the number of open handles.
    pub async fn open_handles(&self) -> usize {
        self.handles.lock().await.open_count()
    }

    fn check_writable(&self, operation: &str) -> SftpWsResult<()> {
        if self.read_only {
            warn!(operation, "Refused on read-only filesystem");
            return Err(SftpWsError::ReadOnly);
        }
        Ok(())
    }

    async fn handle(&self, handle: LocalHandle) -> SftpWsResult<Arc<F::Handle>> {
        self.handles.lock().await.get(handle)
    }

    /// Stores a freshly opened backend handle. After [`dispose`] the handle
    /// is closed on the backend instead and `Closed` is returned.
    ///
    /// [`dispose`]: SafeFilesystem::dispose
    async fn register(&self, handle: F::Handle) -> SftpWsResult<LocalHandle> {
        let mut guard = OrphanGuard {
            fs: self.fs.clone(),
            handle: Some(handle),
        };
        let mut table = self.handles.lock().await;
        let Some(handle) = guard.handle.take() else {
            return Err(SftpWsError::Closed);
        };
        if !table.disposed {
            return Ok(table.insert(handle));
        }
        drop(table);

        debug!("Closing handle opened after dispose");
        if let Err(e) = self.fs.close(&handle).await {
            debug!(error = %e, "Ignoring close failure for late handle");
        }
        Err(SftpWsError::Closed)
    }

    /// Opens a file. Read-only instances accept plain READ only.
    pub async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: &FileAttributes,
    ) -> SftpWsResult<LocalHandle> {
        if !flags.is_read_only() {
            self.check_writable("open")?;
        }
        let handle = self.fs.open(&self.to_real_path(path), flags, attrs).await?;
        self.register(handle).await
    }

    /// Closes a handle and frees its slot.
    pub async fn close(&self, handle: LocalHandle) -> SftpWsResult<()> {
        let backend = self.handles.lock().await.remove(handle)?;
        self.fs.close(&backend).await
    }

    /// Reads from an open file.
    pub async fn read(&self, handle: LocalHandle, offset: u64, length: u32) -> SftpWsResult<Bytes> {
        let backend = self.handle(handle).await?;
        self.fs.read(&backend, offset, length).await
    }

    /// Writes to an open file.
    pub async fn write(&self, handle: LocalHandle, offset: u64, data: &[u8]) -> SftpWsResult<()> {
        self.check_writable("write")?;
        let backend = self.handle(handle).await?;
        self.fs.write(&backend, offset, data).await
    }

    /// Stats without following a final symlink.
    pub async fn lstat(&self, path: &str) -> SftpWsResult<FileAttributes> {
        self.fs.lstat(&self.to_real_path(path)).await
    }

    /// Stats a path.
    pub async fn stat(&self, path: &str) -> SftpWsResult<FileAttributes> {
        self.fs.stat(&self.to_real_path(path)).await
    }

    /// Stats an open handle.
    pub async fn fstat(&self, handle: LocalHandle) -> SftpWsResult<FileAttributes> {
        let backend = self.handle(handle).await?;
        self.fs.fstat(&backend).await
    }

    /// Applies attributes to a path.
    pub async fn setstat(&self, path: &str, attrs: &FileAttributes) -> SftpWsResult<()> {
        self.check_writable("setstat")?;
        self.fs.setstat(&self.to_real_path(path), attrs).await
    }

    /// Applies attributes to an open handle.
    pub async fn fsetstat(&self, handle: LocalHandle, attrs: &FileAttributes) -> SftpWsResult<()> {
        self.check_writable("fsetstat")?;
        let backend = self.handle(handle).await?;
        self.fs.fsetstat(&backend, attrs).await
    }

    /// Opens a directory listing.
    pub async fn opendir(&self, path: &str) -> SftpWsResult<LocalHandle> {
        let handle = self.fs.opendir(&self.to_real_path(path)).await?;
        self.register(handle).await
    }

    /// Returns the next batch of entries, `None` when exhausted.
    pub async fn readdir(&self, handle: LocalHandle) -> SftpWsResult<Option<Vec<NameEntry>>> {
        let backend = self.handle(handle).await?;
        self.fs.readdir(&backend).await
    }

    /// Removes a file.
    pub async fn unlink(&self, path: &str) -> SftpWsResult<()> {
        self.check_writable("remove")?;
        self.fs.unlink(&self.to_real_path(path)).await
    }

    /// Creates a directory.
    pub async fn mkdir(&self, path: &str, attrs: &FileAttributes) -> SftpWsResult<()> {
        self.check_writable("mkdir")?;
        self.fs.mkdir(&self.to_real_path(path), attrs).await
    }

    /// Removes a directory.
    pub async fn rmdir(&self, path: &str) -> SftpWsResult<()> {
        self.check_writable("rmdir")?;
        self.fs.rmdir(&self.to_real_path(path)).await
    }

    /// Canonicalizes a path, answering in virtual terms.
    pub async fn realpath(&self, path: &str) -> SftpWsResult<String> {
        let real = self.fs.realpath(&self.to_real_path(path)).await?;
        Ok(self.to_virtual_path(&real))
    }

    /// Renames a file or directory.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> SftpWsResult<()> {
        self.check_writable("rename")?;
        self.fs
            .rename(&self.to_real_path(old_path), &self.to_real_path(new_path))
            .await
    }

    /// Reads a symlink. The target is reported as an absolute virtual path.
    pub async fn readlink(&self, path: &str) -> SftpWsResult<String> {
        let link = normalize_virtual(path);
        let target = self.fs.readlink(&self.to_real_path(&link)).await?;
        if target.starts_with('/') {
            Ok(self.to_virtual_path(&target))
        } else {
            Ok(resolve_link_target(&link, &target))
        }
    }

    /// Creates a symlink. Relative targets are resolved against the link's
    /// directory, and the backend always receives an absolute real target
    /// inside the root.
    pub async fn symlink(&self, target_path: &str, link_path: &str) -> SftpWsResult<()> {
        self.check_writable("symlink")?;
        let link = normalize_virtual(link_path);
        let target = self.to_real_path(&resolve_link_target(&link, target_path));
        self.fs.symlink(&target, &self.to_real_path(&link)).await
    }

    /// Closes every open handle. Close failures are ignored.
    pub async fn dispose(&self) {
        let open = self.handles.lock().await.drain();
        if !open.is_empty() {
            debug!(count = open.len(), "Closing leftover handles");
        }
        for handle in open {
            if let Err(e) = self.fs.close(&handle).await {
                debug!(error = %e, "Ignoring close failure during dispose");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that counts calls and succeeds with empty results.
    #[derive(Debug, Default)]
    pub(crate) struct CountingFs {
        pub(crate) calls: AtomicUsize,
        pub(crate) opens: AtomicUsize,
        pub(crate) closes: AtomicUsize,
        pub(crate) fail_close: bool,
        pub(crate) links: std::sync::Mutex<Vec<(String, String)>>,
    }

    impl CountingFs {
        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub(crate) fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl FileSystem for CountingFs {
        type Handle = String;

        async fn open(&self, path: &str, _: OpenFlags, _: &FileAttributes) -> SftpWsResult<String> {
            self.hit();
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(path.to_string())
        }
        async fn close(&self, _: &String) -> SftpWsResult<()> {
            self.hit();
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(SftpWsError::Io(std::io::Error::from(std::io::ErrorKind::Other)))
            } else {
                Ok(())
            }
        }
        async fn read(&self, _: &String, _: u64, _: u32) -> SftpWsResult<Bytes> {
            self.hit();
            Ok(Bytes::new())
        }
        async fn write(&self, _: &String, _: u64, _: &[u8]) -> SftpWsResult<()> {
            self.hit();
            Ok(())
        }
        async fn lstat(&self, _: &str) -> SftpWsResult<FileAttributes> {
            self.hit();
            Ok(FileAttributes::new())
        }
        async fn stat(&self, _: &str) -> SftpWsResult<FileAttributes> {
            self.hit();
            Ok(FileAttributes::new())
        }
        async fn fstat(&self, _: &String) -> SftpWsResult<FileAttributes> {
            self.hit();
            Ok(FileAttributes::new())
        }
        async fn setstat(&self, _: &str, _: &FileAttributes) -> SftpWsResult<()> {
            self.hit();
            Ok(())
        }
        async fn fsetstat(&self, _: &String, _: &FileAttributes) -> SftpWsResult<()> {
            self.hit();
            Ok(())
        }
        async fn opendir(&self, path: &str) -> SftpWsResult<String> {
            self.hit();
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(path.to_string())
        }
        async fn readdir(&self, _: &String) -> SftpWsResult<Option<Vec<NameEntry>>> {
            self.hit();
            Ok(None)
        }
        async fn unlink(&self, _: &str) -> SftpWsResult<()> {
            self.hit();
            Ok(())
        }
        async fn mkdir(&self, _: &str, _: &FileAttributes) -> SftpWsResult<()> {
            self.hit();
            Ok(())
        }
        async fn rmdir(&self, _: &str) -> SftpWsResult<()> {
            self.hit();
            Ok(())
        }
        async fn realpath(&self, path: &str) -> SftpWsResult<String> {
            self.hit();
            Ok(path.to_string())
        }
        async fn rename(&self, _: &str, _: &str) -> SftpWsResult<()> {
            self.hit();
            Ok(())
        }
        async fn readlink(&self, _: &str) -> SftpWsResult<String> {
            self.hit();
            Ok("/srv/files/real/target".to_string())
        }
        async fn symlink(&self, target_path: &str, link_path: &str) -> SftpWsResult<()> {
            self.hit();
            self.links
                .lock()
                .unwrap()
                .push((target_path.to_string(), link_path.to_string()));
            Ok(())
        }
    }

    fn sandbox(read_only: bool) -> (Arc<CountingFs>, SafeFilesystem<CountingFs>) {
        let fs = Arc::new(CountingFs::default());
        let safe = SafeFilesystem::new(fs.clone(), "/srv/files", read_only).unwrap();
        (fs, safe)
    }

    #[test]
    fn test_normalize_virtual() {
        assert_eq!(normalize_virtual(""), "/");
        assert_eq!(normalize_virtual("."), "/");
        assert_eq!(normalize_virtual("a/./b/"), "/a/b");
        assert_eq!(normalize_virtual("/a/../../b"), "/b");
        assert_eq!(normalize_virtual("//a//b"), "/a/b");
    }

    #[test]
    fn test_path_escape_is_confined() {
        let (_, safe) = sandbox(false);
        assert_eq!(safe.to_real_path("/../../etc/passwd"), "/srv/files/etc/passwd");
        assert_eq!(safe.to_real_path("/"), "/srv/files");
        assert_eq!(safe.to_real_path(".."), "/srv/files");
        assert_eq!(safe.to_real_path("docs/a.txt"), "/srv/files/docs/a.txt");
    }

    #[test]
    fn test_virtual_real_roundtrip() {
        let (_, safe) = sandbox(false);
        for real in ["/srv/files", "/srv/files/a", "/srv/files/a/b.txt"] {
            assert_eq!(safe.to_real_path(&safe.to_virtual_path(real)), real);
        }
        assert_eq!(safe.to_virtual_path("/etc/passwd"), "/");
        // sibling directory sharing the prefix
        assert_eq!(safe.to_virtual_path("/srv/filesystem/x"), "/");
    }

    #[test]
    fn test_root_must_be_absolute() {
        let fs = Arc::new(CountingFs::default());
        assert!(matches!(
            SafeFilesystem::new(fs, "relative", false),
            Err(SftpWsError::Config(_))
        ));
    }

    #[test]
    fn test_handle_wire_form() {
        assert!(LocalHandle::from_wire(&[0, 0, 0, 0]).is_err());
        assert!(LocalHandle::from_wire(&[0, 0, 1]).is_err());
        let handle = LocalHandle::from_wire(&[0, 0, 0, 7]).unwrap();
        assert_eq!(handle.value(), 7);
        assert_eq!(&handle.to_wire()[..], &[0, 0, 0, 7]);
    }

    #[test]
    fn test_handle_table_appends_then_reuses() {
        let mut table = HandleTable::new();
        let first = table.insert(1u32);
        let second = table.insert(2u32);
        assert_eq!(first.value(), 1);
        assert_eq!(second.value(), 2);

        // small table: freed slot is not reused
        table.remove(first).unwrap();
        assert_eq!(table.insert(3u32).value(), 3);

        while table.slots.len() <= SLOT_REUSE_THRESHOLD {
            table.insert(0u32);
        }
        assert_eq!(table.open_count(), SLOT_REUSE_THRESHOLD);
        // large table: first free slot is reused
        assert_eq!(table.insert(99u32), first);
        assert_eq!(*table.get(first).unwrap(), 99);
    }

    #[tokio::test]
    async fn test_invalid_handle_skips_backend() {
        let (fs, safe) = sandbox(false);
        let bogus = LocalHandle(42);
        assert!(matches!(safe.read(bogus, 0, 10).await, Err(SftpWsError::InvalidHandle)));
        assert!(matches!(safe.close(bogus).await, Err(SftpWsError::InvalidHandle)));
        assert!(matches!(safe.fstat(bogus).await, Err(SftpWsError::InvalidHandle)));
        assert_eq!(fs.call_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_handle_is_rejected() {
        let (_, safe) = sandbox(false);
        let handle = safe.open("/a", OpenFlags::READ, &FileAttributes::new()).await.unwrap();
        safe.close(handle).await.unwrap();
        assert!(matches!(safe.read(handle, 0, 1).await, Err(SftpWsError::InvalidHandle)));
    }

    #[tokio::test]
    async fn test_read_only_rejects_mutations_without_backend_calls() {
        let (fs, safe) = sandbox(true);
        let attrs = FileAttributes::new();
        let handle = LocalHandle(1);

        assert!(matches!(
            safe.open("/a", OpenFlags::from_mode("w").unwrap(), &attrs).await,
            Err(SftpWsError::ReadOnly)
        ));
        assert!(matches!(safe.write(handle, 0, b"x").await, Err(SftpWsError::ReadOnly)));
        assert!(matches!(safe.setstat("/a", &attrs).await, Err(SftpWsError::ReadOnly)));
        assert!(matches!(safe.fsetstat(handle, &attrs).await, Err(SftpWsError::ReadOnly)));
        assert!(matches!(safe.unlink("/a").await, Err(SftpWsError::ReadOnly)));
        assert!(matches!(safe.mkdir("/d", &attrs).await, Err(SftpWsError::ReadOnly)));
        assert!(matches!(safe.rmdir("/d").await, Err(SftpWsError::ReadOnly)));
        assert!(matches!(safe.rename("/a", "/b").await, Err(SftpWsError::ReadOnly)));
        assert!(matches!(safe.symlink("/a", "/l").await, Err(SftpWsError::ReadOnly)));
        assert_eq!(fs.call_count(), 0);

        // plain reads still work
        safe.open("/a", OpenFlags::READ, &attrs).await.unwrap();
        assert_eq!(fs.call_count(), 1);
    }

    #[tokio::test]
    async fn test_backend_sees_real_paths() {
        let (_, safe) = sandbox(false);
        let handle = safe
            .open("/../x.txt", OpenFlags::READ, &FileAttributes::new())
            .await
            .unwrap();
        let backend = safe.handle(handle).await.unwrap();
        assert_eq!(backend.as_str(), "/srv/files/x.txt");

        assert_eq!(safe.realpath("/a/../b").await.unwrap(), "/b");
        assert_eq!(safe.readlink("/link").await.unwrap(), "/real/target");
    }

    #[test]
    fn test_link_targets_resolve_from_link_directory() {
        assert_eq!(resolve_link_target("/a/b/link", "c.txt"), "/a/b/c.txt");
        assert_eq!(resolve_link_target("/a/link", "../x"), "/x");
        assert_eq!(resolve_link_target("/link", "../../secret.txt"), "/secret.txt");
        assert_eq!(resolve_link_target("/a/link", "/abs/../t"), "/t");
    }

    #[tokio::test]
    async fn test_symlink_targets_stay_inside_root() {
        let (fs, safe) = sandbox(false);
        safe.symlink("../secret.txt", "/leak").await.unwrap();
        safe.symlink("../../x", "/docs/sub/l").await.unwrap();
        safe.symlink("/../etc/passwd", "/p").await.unwrap();

        let links = fs.links.lock().unwrap().clone();
        assert_eq!(
            links,
            vec![
                ("/srv/files/secret.txt".to_string(), "/srv/files/leak".to_string()),
                ("/srv/files/x".to_string(), "/srv/files/docs/sub/l".to_string()),
                ("/srv/files/etc/passwd".to_string(), "/srv/files/p".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_open_after_dispose_closes_backend_handle() {
        let (fs, safe) = sandbox(false);
        safe.dispose().await;

        let result = safe.open("/a", OpenFlags::READ, &FileAttributes::new()).await;
        assert!(matches!(result, Err(SftpWsError::Closed)));
        assert!(matches!(safe.opendir("/d").await, Err(SftpWsError::Closed)));
        assert_eq!(fs.open_count(), 2);
        assert_eq!(fs.close_count(), 2);
        assert_eq!(safe.open_handles().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_open_closes_backend_handle() {
        let (fs, safe) = sandbox(false);
        let safe = Arc::new(safe);

        // hold the table so the open stalls right before registering
        let table = safe.handles.lock().await;
        let s = safe.clone();
        let task = tokio::spawn(async move {
            s.open("/a", OpenFlags::READ, &FileAttributes::new()).await
        });
        while fs.open_count() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        drop(table);

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while fs.close_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(safe.open_handles().await, 0);
    }

    #[tokio::test]
    async fn test_dispose_closes_everything() {
        let fs = Arc::new(CountingFs {
            fail_close: true,
            ..Default::default()
        });
        let safe = SafeFilesystem::new(fs.clone(), "/", false).unwrap();
        for name in ["/a", "/b", "/c"] {
            safe.open(name, OpenFlags::READ, &FileAttributes::new()).await.unwrap();
        }
        assert_eq!(safe.open_handles().await, 3);

        safe.dispose().await;
        assert_eq!(fs.closes.load(Ordering::SeqCst), 3);
        assert_eq!(safe.open_handles().await, 0);
    }
}
