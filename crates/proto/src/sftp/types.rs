//! SFTP data types and structures.

use super::codec::{PacketReader, PacketWriter};
use sftpws_platform::{SftpWsError, SftpWsResult};
use std::fmt;
use std::str::FromStr;

/// SFTP status codes (SSH_FX_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    /// SSH_FX_OK - Success
    Ok = 0,
    /// SSH_FX_EOF - End of file
    Eof = 1,
    /// SSH_FX_NO_SUCH_FILE - No such file
    NoSuchFile = 2,
    /// SSH_FX_PERMISSION_DENIED - Permission denied
    PermissionDenied = 3,
    /// SSH_FX_FAILURE - General failure
    Failure = 4,
    /// SSH_FX_BAD_MESSAGE - Bad message
    BadMessage = 5,
    /// SSH_FX_NO_CONNECTION - No connection
    NoConnection = 6,
    /// SSH_FX_CONNECTION_LOST - Connection lost
    ConnectionLost = 7,
    /// SSH_FX_OP_UNSUPPORTED - Operation not supported
    OpUnsupported = 8,
}

impl StatusCode {
    /// Convert from u32.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Eof),
            2 => Some(Self::NoSuchFile),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::Failure),
            5 => Some(Self::BadMessage),
            6 => Some(Self::NoConnection),
            7 => Some(Self::ConnectionLost),
            8 => Some(Self::OpUnsupported),
            _ => None,
        }
    }

    /// Returns the default message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Eof => "End of file",
            Self::NoSuchFile => "No such file",
            Self::PermissionDenied => "Permission denied",
            Self::Failure => "Failure",
            Self::BadMessage => "Bad message",
            Self::NoConnection => "No connection",
            Self::ConnectionLost => "Connection lost",
            Self::OpUnsupported => "Operation not supported",
        }
    }

    /// Builds an error carrying this code and `description`.
    pub fn error(self, description: impl Into<String>) -> SftpWsError {
        SftpWsError::status(self as u32, description)
    }
}

/// File open flags (SSH_FXF_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// SSH_FXF_READ - Open for reading
    pub const READ: OpenFlags = OpenFlags(0x0000_0001);
    /// SSH_FXF_WRITE - Open for writing
    pub const WRITE: OpenFlags = OpenFlags(0x0000_0002);
    /// SSH_FXF_APPEND - Force writes to append
    pub const APPEND: OpenFlags = OpenFlags(0x0000_0004);
    /// SSH_FXF_CREAT - Create if doesn't exist
    pub const CREAT: OpenFlags = OpenFlags(0x0000_0008);
    /// SSH_FXF_TRUNC - Truncate to 0 length
    pub const TRUNC: OpenFlags = OpenFlags(0x0000_0010);
    /// SSH_FXF_EXCL - Fail if file exists
    pub const EXCL: OpenFlags = OpenFlags(0x0000_0020);

    const MODES: [(&'static str, u32); 16] = [
        ("r", 0x01),
        ("r+", 0x01 | 0x02),
        ("w", 0x02 | 0x08 | 0x10),
        ("wx", 0x02 | 0x08 | 0x10 | 0x20),
        ("xw", 0x02 | 0x08 | 0x10 | 0x20),
        ("w+", 0x01 | 0x02 | 0x08 | 0x10),
        ("wx+", 0x01 | 0x02 | 0x08 | 0x10 | 0x20),
        ("xw+", 0x01 | 0x02 | 0x08 | 0x10 | 0x20),
        ("a", 0x02 | 0x08 | 0x04),
        ("ax", 0x02 | 0x08 | 0x04 | 0x20),
        ("xa", 0x02 | 0x08 | 0x04 | 0x20),
        ("a+", 0x01 | 0x02 | 0x08 | 0x04),
        ("ax+", 0x01 | 0x02 | 0x08 | 0x04 | 0x20),
        ("xa+", 0x01 | 0x02 | 0x08 | 0x04 | 0x20),
        ("rs", 0x01),
        ("rs+", 0x01 | 0x02),
    ];

    /// Returns the flags for a mode string such as `"r"`, `"w"` or `"a+"`.
    pub fn from_mode(mode: &str) -> Option<Self> {
        Self::MODES
            .iter()
            .find(|(name, _)| *name == mode)
            .map(|(_, bits)| OpenFlags(*bits))
    }

    /// Returns the canonical mode string for these flags, if one exists.
    pub fn to_mode(self) -> Option<&'static str> {
        Self::MODES
            .iter()
            .find(|(_, bits)| *bits == self.0)
            .map(|(name, _)| *name)
    }

    /// Returns true if all bits of `other` are set.
    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the flags permit nothing but reading.
    pub fn is_read_only(self) -> bool {
        self == Self::READ
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl FromStr for OpenFlags {
    type Err = SftpWsError;

    fn from_str(mode: &str) -> SftpWsResult<Self> {
        Self::from_mode(mode)
            .ok_or_else(|| SftpWsError::InvalidInput(format!("Invalid open mode '{}'", mode)))
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_mode() {
            Some(mode) => f.write_str(mode),
            None => write!(f, "0x{:02x}", self.0),
        }
    }
}

/// File mode bits.
pub struct FileMode;

impl FileMode {
    /// File type mask
    pub const TYPE_MASK: u32 = 0o170000;
    /// Socket
    pub const SOCKET: u32 = 0o140000;
    /// Symbolic link
    pub const SYMLINK: u32 = 0o120000;
    /// Regular file
    pub const REGULAR: u32 = 0o100000;
    /// Block device
    pub const BLOCK_DEVICE: u32 = 0o060000;
    /// Directory
    pub const DIRECTORY: u32 = 0o040000;
    /// Character device
    pub const CHAR_DEVICE: u32 = 0o020000;
    /// FIFO
    pub const FIFO: u32 = 0o010000;

    /// Default file permissions (0644 = rw-r--r--)
    pub const DEFAULT_FILE: u32 = 0o644;
    /// Default directory permissions (0755 = rwxr-xr-x)
    pub const DEFAULT_DIR: u32 = 0o755;
}

/// File type derived from the mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Special file
    Special,
    /// Unknown type
    Unknown,
}

/// File attribute flags.
#[derive(Debug, Clone, Copy)]
pub struct AttrFlags;

impl AttrFlags {
    /// SSH_FILEXFER_ATTR_SIZE
    pub const SIZE: u32 = 0x00000001;
    /// SSH_FILEXFER_ATTR_UIDGID
    pub const UIDGID: u32 = 0x00000002;
    /// SSH_FILEXFER_ATTR_PERMISSIONS
    pub const PERMISSIONS: u32 = 0x00000004;
    /// SSH_FILEXFER_ATTR_ACMODTIME
    pub const ACMODTIME: u32 = 0x00000008;
    /// SSH_FILEXFER_ATTR_EXTENDED
    pub const EXTENDED: u32 = 0x80000000;
}

/// File attributes.
///
/// Every field is optional; `None` means "unknown", which is distinct from
/// zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// User ID
    pub uid: Option<u32>,
    /// Group ID
    pub gid: Option<u32>,
    /// Permissions, including the file type bits
    pub permissions: Option<u32>,
    /// Access time (Unix timestamp)
    pub atime: Option<u32>,
    /// Modification time (Unix timestamp)
    pub mtime: Option<u32>,
}

impl FileAttributes {
    /// Creates empty attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the wire flags for the fields that are present.
    pub fn flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= AttrFlags::SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= AttrFlags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= AttrFlags::PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= AttrFlags::ACMODTIME;
        }
        flags
    }

    /// Returns true if no field is known.
    pub fn is_empty(&self) -> bool {
        self.flags() == 0
    }

    /// Returns the file type encoded in the permission bits.
    pub fn file_type(&self) -> FileType {
        match self.permissions.map(|mode| mode & FileMode::TYPE_MASK) {
            None => FileType::Unknown,
            Some(FileMode::REGULAR) => FileType::Regular,
            Some(FileMode::DIRECTORY) => FileType::Directory,
            Some(FileMode::SYMLINK) => FileType::Symlink,
            Some(0) => FileType::Unknown,
            Some(_) => FileType::Special,
        }
    }

    /// Returns true for directories.
    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    /// Serializes into `writer`.
    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u32(self.flags());
        if let Some(size) = self.size {
            writer.write_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            writer.write_u32(uid).write_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            writer.write_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            writer.write_u32(atime).write_u32(mtime);
        }
    }

    /// Parses from `reader`.
    ///
    /// Extended attribute pairs are consumed and discarded.
    pub fn decode(reader: &mut PacketReader<'_>) -> SftpWsResult<Self> {
        let flags = reader.read_u32()?;
        let mut attrs = Self::new();

        if flags & AttrFlags::SIZE != 0 {
            attrs.size = Some(reader.read_u64()?);
        }
        if flags & AttrFlags::UIDGID != 0 {
            attrs.uid = Some(reader.read_u32()?);
            attrs.gid = Some(reader.read_u32()?);
        }
        if flags & AttrFlags::PERMISSIONS != 0 {
            attrs.permissions = Some(reader.read_u32()?);
        }
        if flags & AttrFlags::ACMODTIME != 0 {
            attrs.atime = Some(reader.read_u32()?);
            attrs.mtime = Some(reader.read_u32()?);
        }
        if flags & AttrFlags::EXTENDED != 0 {
            let count = reader.read_u32()?;
            for _ in 0..count {
                reader.skip_string()?;
                reader.skip_string()?;
            }
        }

        Ok(attrs)
    }
}

/// A directory entry as carried by SSH_FXP_NAME.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    /// File name (no directory component for READDIR results)
    pub filename: String,
    /// `ls -l` style rendering
    pub longname: String,
    /// Attributes, if known
    pub attrs: Option<FileAttributes>,
}

impl NameEntry {
    /// Creates an entry with a generated long name.
    pub fn new(filename: impl Into<String>, attrs: FileAttributes) -> Self {
        let filename = filename.into();
        let longname = long_name(&filename, &attrs);
        Self {
            filename,
            longname,
            attrs: Some(attrs),
        }
    }

    /// Creates an entry without attributes whose long name is the path itself.
    pub fn path(path: impl Into<String>) -> Self {
        let filename = path.into();
        Self {
            longname: filename.clone(),
            filename,
            attrs: None,
        }
    }

    /// Serializes into `writer`.
    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_string(&self.filename);
        writer.write_string(&self.longname);
        match &self.attrs {
            Some(attrs) => attrs.encode(writer),
            None => {
                writer.write_u32(0);
            }
        }
    }

    /// Parses from `reader`.
    pub fn decode(reader: &mut PacketReader<'_>) -> SftpWsResult<Self> {
        let filename = reader.read_string()?;
        let longname = reader.read_string()?;
        let attrs = FileAttributes::decode(reader)?;
        Ok(Self {
            filename,
            longname,
            attrs: if attrs.is_empty() { None } else { Some(attrs) },
        })
    }
}

/// Renders `ls -l` style output for `filename`.
///
/// ```text
/// drwxr-xr-x   1 1000     1000         4096 Mar 04 17:11 src
/// ```
pub fn long_name(filename: &str, attrs: &FileAttributes) -> String {
    let mode = attrs.permissions.unwrap_or(0);
    let type_char = match mode & FileMode::TYPE_MASK {
        FileMode::DIRECTORY => 'd',
        FileMode::SYMLINK => 'l',
        FileMode::CHAR_DEVICE => 'c',
        FileMode::BLOCK_DEVICE => 'b',
        FileMode::FIFO => 'p',
        FileMode::SOCKET => 's',
        _ => '-',
    };

    let mut perms = String::with_capacity(10);
    perms.push(type_char);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        perms.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        perms.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        perms.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }

    let owner = attrs.uid.map_or_else(|| "-".to_string(), |uid| uid.to_string());
    let group = attrs.gid.map_or_else(|| "-".to_string(), |gid| gid.to_string());
    let size = attrs.size.unwrap_or(0);

    format!(
        "{} {:>3} {:<8} {:<8} {:>8} {} {}",
        perms,
        1,
        owner,
        group,
        size,
        format_mtime(attrs.mtime),
        filename
    )
}

/// Recent files show the time of day, older ones the year.
fn format_mtime(mtime: Option<u32>) -> String {
    const SIX_MONTHS_SECS: i64 = 182 * 24 * 60 * 60;

    let Some(timestamp) = mtime.and_then(|t| chrono::DateTime::from_timestamp(t as i64, 0))
    else {
        return "Jan 01  1970".to_string();
    };

    let age = chrono::Utc::now().signed_duration_since(timestamp).num_seconds();
    if (0..SIX_MONTHS_SECS).contains(&age) {
        timestamp.format("%b %d %H:%M").to_string()
    } else {
        timestamp.format("%b %d  %Y").to_string()
    }
}
