//! SFTP protocol messages.
//!
//! Typed requests and replies with their wire encodings. Field order follows
//! draft-ietf-secsh-filexfer-02 (protocol version 3).

use super::codec::{PacketReader, PacketWriter};
use super::types::{FileAttributes, NameEntry, OpenFlags};
use bytes::Bytes;
use sftpws_platform::{SftpWsError, SftpWsResult};

/// SFTP protocol version (v3).
pub const SFTP_VERSION: u32 = 3;

/// SFTP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// SSH_FXP_INIT - Initialize SFTP session
    Init = 1,
    /// SSH_FXP_VERSION - Version response
    Version = 2,
    /// SSH_FXP_OPEN - Open file
    Open = 3,
    /// SSH_FXP_CLOSE - Close file/directory
    Close = 4,
    /// SSH_FXP_READ - Read from file
    Read = 5,
    /// SSH_FXP_WRITE - Write to file
    Write = 6,
    /// SSH_FXP_LSTAT - Get attributes without following symlinks
    Lstat = 7,
    /// SSH_FXP_FSTAT - Get attributes by handle
    Fstat = 8,
    /// SSH_FXP_SETSTAT - Set attributes
    Setstat = 9,
    /// SSH_FXP_FSETSTAT - Set attributes by handle
    Fsetstat = 10,
    /// SSH_FXP_OPENDIR - Open directory
    Opendir = 11,
    /// SSH_FXP_READDIR - Read directory
    Readdir = 12,
    /// SSH_FXP_REMOVE - Remove file
    Remove = 13,
    /// SSH_FXP_MKDIR - Create directory
    Mkdir = 14,
    /// SSH_FXP_RMDIR - Remove directory
    Rmdir = 15,
    /// SSH_FXP_REALPATH - Canonicalize path
    Realpath = 16,
    /// SSH_FXP_STAT - Get attributes
    Stat = 17,
    /// SSH_FXP_RENAME - Rename file/directory
    Rename = 18,
    /// SSH_FXP_READLINK - Read symbolic link
    Readlink = 19,
    /// SSH_FXP_SYMLINK - Create symbolic link
    Symlink = 20,

    // Response messages
    /// SSH_FXP_STATUS - Status response
    Status = 101,
    /// SSH_FXP_HANDLE - File handle response
    Handle = 102,
    /// SSH_FXP_DATA - Data response
    Data = 103,
    /// SSH_FXP_NAME - Name response
    Name = 104,
    /// SSH_FXP_ATTRS - Attributes response
    Attrs = 105,

    // Extended messages
    /// SSH_FXP_EXTENDED - Extended request
    Extended = 200,
    /// SSH_FXP_EXTENDED_REPLY - Extended response
    ExtendedReply = 201,
}

impl MessageType {
    /// Convert from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Init),
            2 => Some(Self::Version),
            3 => Some(Self::Open),
            4 => Some(Self::Close),
            5 => Some(Self::Read),
            6 => Some(Self::Write),
            7 => Some(Self::Lstat),
            8 => Some(Self::Fstat),
            9 => Some(Self::Setstat),
            10 => Some(Self::Fsetstat),
            11 => Some(Self::Opendir),
            12 => Some(Self::Readdir),
            13 => Some(Self::Remove),
            14 => Some(Self::Mkdir),
            15 => Some(Self::Rmdir),
            16 => Some(Self::Realpath),
            17 => Some(Self::Stat),
            18 => Some(Self::Rename),
            19 => Some(Self::Readlink),
            20 => Some(Self::Symlink),
            101 => Some(Self::Status),
            102 => Some(Self::Handle),
            103 => Some(Self::Data),
            104 => Some(Self::Name),
            105 => Some(Self::Attrs),
            200 => Some(Self::Extended),
            201 => Some(Self::ExtendedReply),
            _ => None,
        }
    }

    /// Returns false for the two handshake messages, which have no request id.
    pub fn carries_request_id(kind: u8) -> bool {
        kind != Self::Init as u8 && kind != Self::Version as u8
    }

    /// Protocol name, e.g. `SSH_FXP_OPEN`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "SSH_FXP_INIT",
            Self::Version => "SSH_FXP_VERSION",
            Self::Open => "SSH_FXP_OPEN",
            Self::Close => "SSH_FXP_CLOSE",
            Self::Read => "SSH_FXP_READ",
            Self::Write => "SSH_FXP_WRITE",
            Self::Lstat => "SSH_FXP_LSTAT",
            Self::Fstat => "SSH_FXP_FSTAT",
            Self::Setstat => "SSH_FXP_SETSTAT",
            Self::Fsetstat => "SSH_FXP_FSETSTAT",
            Self::Opendir => "SSH_FXP_OPENDIR",
            Self::Readdir => "SSH_FXP_READDIR",
            Self::Remove => "SSH_FXP_REMOVE",
            Self::Mkdir => "SSH_FXP_MKDIR",
            Self::Rmdir => "SSH_FXP_RMDIR",
            Self::Realpath => "SSH_FXP_REALPATH",
            Self::Stat => "SSH_FXP_STAT",
            Self::Rename => "SSH_FXP_RENAME",
            Self::Readlink => "SSH_FXP_READLINK",
            Self::Symlink => "SSH_FXP_SYMLINK",
            Self::Status => "SSH_FXP_STATUS",
            Self::Handle => "SSH_FXP_HANDLE",
            Self::Data => "SSH_FXP_DATA",
            Self::Name => "SSH_FXP_NAME",
            Self::Attrs => "SSH_FXP_ATTRS",
            Self::Extended => "SSH_FXP_EXTENDED",
            Self::ExtendedReply => "SSH_FXP_EXTENDED_REPLY",
        }
    }
}

/// A client-to-server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Session start; no request id on the wire.
    Init {
        /// Highest version the client speaks
        version: u32,
    },
    /// Open a file.
    Open {
        /// Path to open
        path: String,
        /// Open flags
        pflags: OpenFlags,
        /// Initial attributes for created files
        attrs: FileAttributes,
    },
    /// Close a file or directory handle.
    Close {
        /// Wire handle
        handle: Bytes,
    },
    /// Read from an open file.
    Read {
        /// Wire handle
        handle: Bytes,
        /// Byte offset
        offset: u64,
        /// Maximum bytes to return
        length: u32,
    },
    /// Write to an open file.
    Write {
        /// Wire handle
        handle: Bytes,
        /// Byte offset
        offset: u64,
        /// Bytes to write
        data: Bytes,
    },
    /// Stat without following a final symlink.
    Lstat {
        /// Path
        path: String,
    },
    /// Stat an open handle.
    Fstat {
        /// Wire handle
        handle: Bytes,
    },
    /// Change attributes by path.
    Setstat {
        /// Path
        path: String,
        /// Attributes to apply
        attrs: FileAttributes,
    },
    /// Change attributes by handle.
    Fsetstat {
        /// Wire handle
        handle: Bytes,
        /// Attributes to apply
        attrs: FileAttributes,
    },
    /// Open a directory for listing.
    Opendir {
        /// Path
        path: String,
    },
    /// Fetch the next batch of directory entries.
    Readdir {
        /// Wire handle
        handle: Bytes,
    },
    /// Remove a file.
    Remove {
        /// Path
        path: String,
    },
    /// Create a directory.
    Mkdir {
        /// Path
        path: String,
        /// Initial attributes
        attrs: FileAttributes,
    },
    /// Remove an empty directory.
    Rmdir {
        /// Path
        path: String,
    },
    /// Canonicalize a path.
    Realpath {
        /// Path
        path: String,
    },
    /// Stat following symlinks.
    Stat {
        /// Path
        path: String,
    },
    /// Rename a file or directory.
    Rename {
        /// Existing path
        old_path: String,
        /// New path
        new_path: String,
    },
    /// Read a symlink target.
    Readlink {
        /// Path
        path: String,
    },
    /// Create a symlink. Wire order is target first, then link path.
    Symlink {
        /// What the link points to
        target_path: String,
        /// Where the link is created
        link_path: String,
    },
}

impl Request {
    /// Returns the message type.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Init { .. } => MessageType::Init,
            Self::Open { .. } => MessageType::Open,
            Self::Close { .. } => MessageType::Close,
            Self::Read { .. } => MessageType::Read,
            Self::Write { .. } => MessageType::Write,
            Self::Lstat { .. } => MessageType::Lstat,
            Self::Fstat { .. } => MessageType::Fstat,
            Self::Setstat { .. } => MessageType::Setstat,
            Self::Fsetstat { .. } => MessageType::Fsetstat,
            Self::Opendir { .. } => MessageType::Opendir,
            Self::Readdir { .. } => MessageType::Readdir,
            Self::Remove { .. } => MessageType::Remove,
            Self::Mkdir { .. } => MessageType::Mkdir,
            Self::Rmdir { .. } => MessageType::Rmdir,
            Self::Realpath { .. } => MessageType::Realpath,
            Self::Stat { .. } => MessageType::Stat,
            Self::Rename { .. } => MessageType::Rename,
            Self::Readlink { .. } => MessageType::Readlink,
            Self::Symlink { .. } => MessageType::Symlink,
        }
    }

    /// Returns the wire handle for handle-based requests.
    pub fn handle(&self) -> Option<&Bytes> {
        match self {
            Self::Close { handle }
            | Self::Read { handle, .. }
            | Self::Write { handle, .. }
            | Self::Fstat { handle }
            | Self::Fsetstat { handle, .. }
            | Self::Readdir { handle } => Some(handle),
            _ => None,
        }
    }

    /// Encodes a complete frame. `id` is ignored for INIT.
    pub fn encode(&self, id: u32) -> Bytes {
        let capacity = match self {
            Self::Write { data, .. } => data.len() + 32,
            _ => 64,
        };
        let mut w = PacketWriter::with_capacity(self.kind(), id, capacity);

        match self {
            Self::Init { version } => {
                w.write_u32(*version);
            }
            Self::Open {
                path,
                pflags,
                attrs,
            } => {
                w.write_string(path).write_u32(pflags.0);
                attrs.encode(&mut w);
            }
            Self::Close { handle } | Self::Fstat { handle } | Self::Readdir { handle } => {
                w.write_data(handle);
            }
            Self::Read {
                handle,
                offset,
                length,
            } => {
                w.write_data(handle).write_u64(*offset).write_u32(*length);
            }
            Self::Write {
                handle,
                offset,
                data,
            } => {
                w.write_data(handle).write_u64(*offset).write_data(data);
            }
            Self::Lstat { path }
            | Self::Opendir { path }
            | Self::Remove { path }
            | Self::Rmdir { path }
            | Self::Realpath { path }
            | Self::Stat { path }
            | Self::Readlink { path } => {
                w.write_string(path);
            }
            Self::Setstat { path, attrs } | Self::Mkdir { path, attrs } => {
                w.write_string(path);
                attrs.encode(&mut w);
            }
            Self::Fsetstat { handle, attrs } => {
                w.write_data(handle);
                attrs.encode(&mut w);
            }
            Self::Rename { old_path, new_path } => {
                w.write_string(old_path).write_string(new_path);
            }
            Self::Symlink {
                target_path,
                link_path,
            } => {
                w.write_string(target_path).write_string(link_path);
            }
        }

        w.finish()
    }

    /// Decodes the payload of a request frame of type `kind`.
    ///
    /// Returns `Ok(None)` for opcodes that are not requests this crate
    /// serves (EXTENDED and anything unknown).
    pub fn decode(kind: u8, r: &mut PacketReader<'_>) -> SftpWsResult<Option<Self>> {
        let Some(kind) = MessageType::from_u8(kind) else {
            return Ok(None);
        };

        let handle = |r: &mut PacketReader<'_>| -> SftpWsResult<Bytes> {
            Ok(Bytes::copy_from_slice(r.read_data()?))
        };

        let request = match kind {
            MessageType::Init => Self::Init {
                version: r.read_u32()?,
            },
            MessageType::Open => Self::Open {
                path: r.read_string()?,
                pflags: OpenFlags(r.read_u32()?),
                attrs: FileAttributes::decode(r)?,
            },
            MessageType::Close => Self::Close { handle: handle(r)? },
            MessageType::Read => Self::Read {
                handle: handle(r)?,
                offset: r.read_u64()?,
                length: r.read_u32()?,
            },
            MessageType::Write => Self::Write {
                handle: handle(r)?,
                offset: r.read_u64()?,
                data: Bytes::copy_from_slice(r.read_data()?),
            },
            MessageType::Lstat => Self::Lstat {
                path: r.read_string()?,
            },
            MessageType::Fstat => Self::Fstat { handle: handle(r)? },
            MessageType::Setstat => Self::Setstat {
                path: r.read_string()?,
                attrs: FileAttributes::decode(r)?,
            },
            MessageType::Fsetstat => Self::Fsetstat {
                handle: handle(r)?,
                attrs: FileAttributes::decode(r)?,
            },
            MessageType::Opendir => Self::Opendir {
                path: r.read_string()?,
            },
            MessageType::Readdir => Self::Readdir { handle: handle(r)? },
            MessageType::Remove => Self::Remove {
                path: r.read_string()?,
            },
            MessageType::Mkdir => Self::Mkdir {
                path: r.read_string()?,
                attrs: FileAttributes::decode(r)?,
            },
            MessageType::Rmdir => Self::Rmdir {
                path: r.read_string()?,
            },
            MessageType::Realpath => Self::Realpath {
                path: r.read_string()?,
            },
            MessageType::Stat => Self::Stat {
                path: r.read_string()?,
            },
            MessageType::Rename => Self::Rename {
                old_path: r.read_string()?,
                new_path: r.read_string()?,
            },
            MessageType::Readlink => Self::Readlink {
                path: r.read_string()?,
            },
            MessageType::Symlink => Self::Symlink {
                target_path: r.read_string()?,
                link_path: r.read_string()?,
            },
            _ => return Ok(None),
        };

        Ok(Some(request))
    }
}

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Handshake reply; no request id on the wire.
    Version {
        /// Negotiated version
        version: u32,
    },
    /// Outcome of an operation.
    Status {
        /// SSH_FX_* code
        code: u32,
        /// Human readable message
        message: String,
    },
    /// Opaque handle for OPEN and OPENDIR.
    Handle(Bytes),
    /// File contents for READ.
    Data(Bytes),
    /// Entries for READDIR, REALPATH and READLINK.
    Name(Vec<NameEntry>),
    /// Attributes for the stat family.
    Attrs(FileAttributes),
}

impl Response {
    /// Returns the message type.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::Version { .. } => MessageType::Version,
            Self::Status { .. } => MessageType::Status,
            Self::Handle(_) => MessageType::Handle,
            Self::Data(_) => MessageType::Data,
            Self::Name(_) => MessageType::Name,
            Self::Attrs(_) => MessageType::Attrs,
        }
    }

    /// Encodes a complete frame. `id` is ignored for VERSION.
    pub fn encode(&self, id: u32) -> Bytes {
        let capacity = match self {
            Self::Data(data) => data.len() + 4,
            Self::Name(entries) => entries.len() * 96,
            _ => 32,
        };
        let mut w = PacketWriter::with_capacity(self.kind(), id, capacity);

        match self {
            Self::Version { version } => {
                w.write_u32(*version);
            }
            Self::Status { code, message } => {
                // empty language tag
                w.write_u32(*code).write_string(message).write_string("");
            }
            Self::Handle(handle) => {
                w.write_data(handle);
            }
            Self::Data(data) => {
                w.write_data(data);
            }
            Self::Name(entries) => {
                w.write_u32(entries.len() as u32);
                for entry in entries {
                    entry.encode(&mut w);
                }
            }
            Self::Attrs(attrs) => attrs.encode(&mut w),
        }

        w.finish()
    }

    /// Decodes the payload of a reply frame of type `kind`.
    pub fn decode(kind: u8, r: &mut PacketReader<'_>) -> SftpWsResult<Self> {
        let response = match MessageType::from_u8(kind) {
            Some(MessageType::Version) => {
                let version = r.read_u32()?;
                // extension pairs are not used
                r.read_rest();
                Self::Version { version }
            }
            Some(MessageType::Status) => {
                let code = r.read_u32()?;
                // version 3 servers may omit message and language tag
                let message = if r.is_empty() {
                    String::new()
                } else {
                    r.read_string()?
                };
                if !r.is_empty() {
                    r.skip_string()?;
                }
                Self::Status { code, message }
            }
            Some(MessageType::Handle) => Self::Handle(Bytes::copy_from_slice(r.read_data()?)),
            Some(MessageType::Data) => Self::Data(Bytes::copy_from_slice(r.read_data()?)),
            Some(MessageType::Name) => {
                let count = r.read_u32()? as usize;
                // each entry takes at least 12 bytes
                let mut entries = Vec::with_capacity(count.min(r.remaining() / 12));
                for _ in 0..count {
                    entries.push(NameEntry::decode(r)?);
                }
                Self::Name(entries)
            }
            Some(MessageType::Attrs) => Self::Attrs(FileAttributes::decode(r)?),
            _ => {
                return Err(SftpWsError::Protocol(format!(
                    "Unexpected reply type {}",
                    kind
                )))
            }
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::codec::Frame;

    fn decode_request(frame: &[u8]) -> (Option<u32>, Request) {
        let mut frame = Frame::parse(frame).unwrap();
        let request = Request::decode(frame.kind, &mut frame.payload)
            .unwrap()
            .unwrap();
        assert!(frame.payload.is_empty());
        (frame.id, request)
    }

    fn decode_response(frame: &[u8]) -> (Option<u32>, Response) {
        let mut frame = Frame::parse(frame).unwrap();
        let response = Response::decode(frame.kind, &mut frame.payload).unwrap();
        (frame.id, response)
    }

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::Init));
        assert_eq!(MessageType::from_u8(20), Some(MessageType::Symlink));
        assert_eq!(MessageType::from_u8(105), Some(MessageType::Attrs));
        assert_eq!(MessageType::from_u8(21), None);
        assert_eq!(MessageType::Readdir.name(), "SSH_FXP_READDIR");
    }

    #[test]
    fn test_request_id_presence() {
        assert!(!MessageType::carries_request_id(1));
        assert!(!MessageType::carries_request_id(2));
        assert!(MessageType::carries_request_id(3));
        assert!(MessageType::carries_request_id(101));
    }

    #[test]
    fn test_open_wire_layout() {
        let request = Request::Open {
            path: "/a.txt".to_string(),
            pflags: OpenFlags::READ,
            attrs: FileAttributes::default(),
        };
        let frame = request.encode(2);
        assert_eq!(
            &frame[..],
            &[
                0, 0, 0, 23, // length
                3, // SSH_FXP_OPEN
                0, 0, 0, 2, // id
                0, 0, 0, 6, b'/', b'a', b'.', b't', b'x', b't', // path
                0, 0, 0, 1, // pflags
                0, 0, 0, 0, // attr flags
            ]
        );
        assert_eq!(decode_request(&frame), (Some(2), request));
    }

    #[test]
    fn test_symlink_target_precedes_link() {
        let request = Request::Symlink {
            target_path: "/target".to_string(),
            link_path: "/link".to_string(),
        };
        let frame = request.encode(5);
        let mut parsed = Frame::parse(&frame).unwrap();
        assert_eq!(parsed.payload.read_string().unwrap(), "/target");
        assert_eq!(parsed.payload.read_string().unwrap(), "/link");
    }

    #[test]
    fn test_write_request_carries_data() {
        let request = Request::Write {
            handle: Bytes::from_static(&[0, 0, 0, 1]),
            offset: 1 << 40,
            data: Bytes::from_static(b"payload"),
        };
        let (id, parsed) = decode_request(&request.encode(9));
        assert_eq!(id, Some(9));
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_extended_request_is_not_served() {
        let mut w = PacketWriter::new(MessageType::Extended, 4);
        w.write_string("statvfs@openssh.com").write_string("/");
        let frame = w.finish();
        let mut parsed = Frame::parse(&frame).unwrap();
        assert_eq!(Request::decode(parsed.kind, &mut parsed.payload).unwrap(), None);
        assert_eq!(Request::decode(99, &mut parsed.payload).unwrap(), None);
    }

    #[test]
    fn test_truncated_request_fails() {
        let frame = [0, 0, 0, 7, 17, 0, 0, 0, 1, 0, 0];
        let mut parsed = Frame::parse(&frame).unwrap();
        assert!(Request::decode(parsed.kind, &mut parsed.payload).is_err());
    }

    #[test]
    fn test_status_has_language_tag() {
        let frame = Response::Status {
            code: 0,
            message: "OK".to_string(),
        }
        .encode(3);
        // len, type, id, code, "OK", ""
        assert_eq!(frame.len(), 4 + 1 + 4 + 4 + 6 + 4);
        let (id, parsed) = decode_response(&frame);
        assert_eq!(id, Some(3));
        assert_eq!(
            parsed,
            Response::Status {
                code: 0,
                message: "OK".to_string()
            }
        );
    }

    #[test]
    fn test_bare_status_code_is_accepted() {
        let mut w = PacketWriter::new(MessageType::Status, 1);
        w.write_u32(1);
        let (_, parsed) = decode_response(&w.finish());
        assert_eq!(
            parsed,
            Response::Status {
                code: 1,
                message: String::new()
            }
        );
    }

    #[test]
    fn test_name_response() {
        let response = Response::Name(vec![
            NameEntry::path("/"),
            NameEntry::new("file.txt", FileAttributes {
                size: Some(3),
                ..Default::default()
            }),
        ]);
        let (_, parsed) = decode_response(&response.encode(11));
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_version_has_no_id() {
        let frame = Response::Version {
            version: SFTP_VERSION,
        }
        .encode(42);
        assert_eq!(&frame[..], &[0, 0, 0, 5, 2, 0, 0, 0, 3]);
    }

    #[test]
    fn test_request_type_is_not_a_reply() {
        let frame = Request::Stat {
            path: "/".to_string(),
        }
        .encode(1);
        let mut parsed = Frame::parse(&frame).unwrap();
        assert!(Response::decode(parsed.kind, &mut parsed.payload).is_err());
    }
}
