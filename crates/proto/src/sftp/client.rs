//! SFTP client.
//!
//! [`SftpClient`] pipelines requests over one channel. Every request gets the
//! next id from a wrapping counter and a pending entry recording which reply
//! type it expects; a background task routes replies back to their callers
//! by id, so replies may arrive in any order.
//!
//! # Example
//!
//! ```rust,no_run
//! use sftpws_proto::sftp::{OpenFlags, SftpClient, SftpClientConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SftpClient::connect_ws("ws://127.0.0.1:8022", SftpClientConfig::default()).await?;
//!
//! let handle = client.open("/notes.txt", OpenFlags::READ, None).await?;
//! let data = client.read(&handle, 0, 4096).await?;
//! client.close(&handle).await?;
//! println!("{}", String::from_utf8_lossy(&data));
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use super::channel::{ChannelMessage, ChannelReceiver, ChannelSender, CloseReason};
use super::codec::Frame;
use super::config::SftpClientConfig;
use super::logging;
use super::message::{MessageType, Request, Response, SFTP_VERSION};
use super::types::{FileAttributes, NameEntry, OpenFlags, StatusCode};
use bytes::Bytes;
use sftpws_platform::{SftpWsError, SftpWsResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Source of client instance ids for handle ownership checks.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// An open remote file or directory.
///
/// Only valid with the client that opened it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SftpHandle {
    bytes: Bytes,
    owner: u64,
}

impl SftpHandle {
    /// Returns the wire handle.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reply shape a pending request waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpectedReply {
    Status,
    Handle,
    Data,
    Name,
    Attrs,
    /// NAME, or STATUS(EOF) meaning no more entries
    Listing,
}

/// Decoded reply handed to the waiting caller.
#[derive(Debug)]
enum Reply {
    Done,
    Handle(Bytes),
    Data(Bytes),
    Name(Vec<NameEntry>),
    Attrs(FileAttributes),
    EndOfListing,
}

impl Reply {
    fn unexpected(&self) -> SftpWsError {
        SftpWsError::Protocol(format!("Unexpected reply {:?}", self))
    }
}

/// Interprets `response` for a request that expects `expected`.
///
/// Non-OK status codes become `SftpWsError::Status`; a reply of the wrong
/// type is a protocol error.
fn accept(expected: ExpectedReply, response: Response) -> SftpWsResult<Reply> {
    let reply = match (expected, response) {
        (ExpectedReply::Status, Response::Status { code: 0, .. }) => Reply::Done,
        (ExpectedReply::Data, Response::Status { code: 1, .. }) => Reply::Data(Bytes::new()),
        (ExpectedReply::Listing, Response::Status { code: 1, .. }) => Reply::EndOfListing,
        (_, Response::Status { code: 0, .. }) => {
            return Err(SftpWsError::Protocol(
                "Unexpected OK status for a request that returns data".to_string(),
            ))
        }
        (_, Response::Status { code, message }) => {
            let description = if message.is_empty() {
                StatusCode::from_u32(code)
                    .map(|c| c.message().to_string())
                    .unwrap_or_else(|| format!("Status {}", code))
            } else {
                message
            };
            return Err(SftpWsError::status(code, description));
        }
        (ExpectedReply::Handle, Response::Handle(handle)) => Reply::Handle(handle),
        (ExpectedReply::Data, Response::Data(data)) => Reply::Data(data),
        (ExpectedReply::Name | ExpectedReply::Listing, Response::Name(entries)) => {
            Reply::Name(entries)
        }
        (ExpectedReply::Attrs, Response::Attrs(attrs)) => Reply::Attrs(attrs),
        (expected, response) => {
            return Err(SftpWsError::Protocol(format!(
                "Expected {:?} reply, got {}",
                expected,
                response.kind().name()
            )))
        }
    };
    Ok(reply)
}

struct PendingRequest {
    kind: MessageType,
    expected: ExpectedReply,
    reply: oneshot::Sender<SftpWsResult<Reply>>,
}

/// State shared with the receive task.
struct Shared {
    sender: Box<dyn ChannelSender>,
    pending: Mutex<HashMap<u32, PendingRequest>>,
    closed: AtomicBool,
}

impl Shared {
    /// Marks the session closed and fails every pending request.
    async fn shut_down(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().map(|(_, p)| p).collect()
        };
        for request in drained {
            let _ = request.reply.send(Err(SftpWsError::Closed));
        }
    }

    /// Routes one inbound frame. Errors are fatal for the session.
    async fn route(&self, data: &[u8]) -> SftpWsResult<()> {
        let mut frame = Frame::parse(data)?;
        let Some(id) = frame.id else {
            return Err(SftpWsError::Protocol(format!(
                "Unexpected message of type {} after handshake",
                frame.kind
            )));
        };

        let pending = self.pending.lock().await.remove(&id).ok_or_else(|| {
            SftpWsError::Protocol(format!("Reply for unknown request id {}", id))
        })?;

        let reply = Response::decode(frame.kind, &mut frame.payload)
            .and_then(|response| accept(pending.expected, response));

        if let Err(SftpWsError::Protocol(detail)) = &reply {
            let detail = format!("{} (request {} {})", detail, id, pending.kind.name());
            let _ = pending.reply.send(Err(SftpWsError::Protocol(detail.clone())));
            return Err(SftpWsError::Protocol(detail));
        }

        if let Err(e) = &reply {
            if let Some(code) = e.status_code() {
                logging::request_failed(id, pending.kind, code, &e.to_string());
            }
        }
        // caller may have given up
        let _ = pending.reply.send(reply);
        Ok(())
    }
}

async fn receive_loop(shared: Arc<Shared>, mut receiver: Box<dyn ChannelReceiver>, peer: String) {
    let shutdown = loop {
        match receiver.recv().await {
            Ok(Some(ChannelMessage::Binary(data))) => {
                if let Err(e) = shared.route(&data).await {
                    break Some((CloseReason::ProtocolError, e.to_string()));
                }
            }
            Ok(Some(ChannelMessage::Text(_))) => {
                break Some((CloseReason::UnsupportedData, "Text message received".to_string()));
            }
            Ok(Some(ChannelMessage::Close(_))) | Ok(None) => break None,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Channel receive failed");
                break None;
            }
        }
    };

    shared.shut_down().await;
    let reason = match shutdown {
        Some((reason, detail)) => {
            logging::protocol_violation(&peer, &detail);
            let _ = shared.sender.close(reason).await;
            reason.description()
        }
        None => CloseReason::Normal.description(),
    };
    logging::session_closed(&peer, reason);
}

/// SFTP client over a message channel.
pub struct SftpClient {
    shared: Arc<Shared>,
    instance: u64,
    next_id: AtomicU32,
    config: SftpClientConfig,
    receiver_task: JoinHandle<()>,
}

impl std::fmt::Debug for SftpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpClient")
            .field("instance", &self.instance)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SftpClient {
    /// Performs the INIT/VERSION handshake and starts routing replies.
    ///
    /// # Errors
    ///
    /// - [`SftpWsError::Config`] if `config` is invalid
    /// - [`SftpWsError::Protocol`] if the server does not answer with VERSION 3
    /// - [`SftpWsError::Closed`] if the channel closes during the handshake
    pub async fn connect<S, R>(
        sender: S,
        receiver: R,
        config: SftpClientConfig,
    ) -> SftpWsResult<Self>
    where
        S: ChannelSender + 'static,
        R: ChannelReceiver + 'static,
    {
        let peer = "server".to_string();
        Self::connect_with_peer(Box::new(sender), Box::new(receiver), config, peer).await
    }

    /// Dials a WebSocket URL and connects over it.
    #[cfg(feature = "websocket")]
    pub async fn connect_ws(url: &str, config: SftpClientConfig) -> SftpWsResult<Self> {
        use super::channel::websocket;

        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(websocket::ws_error)?;
        let (sender, receiver) = websocket::split(ws);
        Self::connect_with_peer(Box::new(sender), Box::new(receiver), config, url.to_string()).await
    }

    async fn connect_with_peer(
        sender: Box<dyn ChannelSender>,
        mut receiver: Box<dyn ChannelReceiver>,
        config: SftpClientConfig,
        peer: String,
    ) -> SftpWsResult<Self> {
        config.validate()?;

        sender
            .send(Request::Init {
                version: SFTP_VERSION,
            }
            .encode(0))
            .await?;

        let version = match receiver.recv().await? {
            Some(ChannelMessage::Binary(data)) => {
                let mut frame = Frame::parse(&data)?;
                match Response::decode(frame.kind, &mut frame.payload)? {
                    Response::Version { version } => version,
                    other => {
                        let _ = sender.close(CloseReason::ProtocolError).await;
                        return Err(SftpWsError::Protocol(format!(
                            "Expected SSH_FXP_VERSION, got {}",
                            other.kind().name()
                        )));
                    }
                }
            }
            Some(ChannelMessage::Text(_)) => {
                let _ = sender.close(CloseReason::UnsupportedData).await;
                return Err(SftpWsError::Protocol("Text message during handshake".to_string()));
            }
            Some(ChannelMessage::Close(_)) | None => return Err(SftpWsError::Closed),
        };

        if version != SFTP_VERSION {
            let _ = sender.close(CloseReason::ProtocolError).await;
            return Err(SftpWsError::Protocol(format!(
                "Unsupported SFTP version {}",
                version
            )));
        }
        logging::handshake_complete(&peer, version);

        let shared = Arc::new(Shared {
            sender,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let receiver_task = tokio::spawn(receive_loop(shared.clone(), receiver, peer));

        Ok(Self {
            shared,
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            next_id: AtomicU32::new(1),
            config,
            receiver_task,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SftpClientConfig {
        &self.config
    }

    /// Returns true once the session has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Ends the session. Pending requests fail with [`SftpWsError::Closed`].
    pub async fn disconnect(&self) -> SftpWsResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.shared.shut_down().await;
        self.shared.sender.close(CloseReason::Normal).await
    }

    async fn request(&self, request: Request, expected: ExpectedReply) -> SftpWsResult<Reply> {
        let kind = request.kind();
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut pending = self.shared.pending.lock().await;
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(SftpWsError::Closed);
            }
            // fetch_add wraps at u32::MAX
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if pending.contains_key(&id) {
                return Err(SftpWsError::Protocol(format!(
                    "Request id {} is still outstanding",
                    id
                )));
            }
            pending.insert(
                id,
                PendingRequest {
                    kind,
                    expected,
                    reply: tx,
                },
            );
            id
        };

        debug!(request_id = id, op = kind.name(), "Sending request");
        if let Err(e) = self.shared.sender.send(request.encode(id)).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| SftpWsError::Closed)?
    }

    async fn void(&self, request: Request) -> SftpWsResult<()> {
        match self.request(request, ExpectedReply::Status).await? {
            Reply::Done => Ok(()),
            other => Err(other.unexpected()),
        }
    }

    async fn attrs(&self, request: Request) -> SftpWsResult<FileAttributes> {
        match self.request(request, ExpectedReply::Attrs).await? {
            Reply::Attrs(attrs) => Ok(attrs),
            other => Err(other.unexpected()),
        }
    }

    async fn handle(&self, request: Request) -> SftpWsResult<SftpHandle> {
        match self.request(request, ExpectedReply::Handle).await? {
            Reply::Handle(bytes) => Ok(SftpHandle {
                bytes,
                owner: self.instance,
            }),
            other => Err(other.unexpected()),
        }
    }

    async fn single_name(&self, request: Request) -> SftpWsResult<String> {
        match self.request(request, ExpectedReply::Name).await? {
            Reply::Name(entries) => entries
                .into_iter()
                .next()
                .map(|entry| entry.filename)
                .ok_or_else(|| StatusCode::Failure.error("Empty name reply")),
            other => Err(other.unexpected()),
        }
    }

    fn wire(&self, handle: &SftpHandle) -> SftpWsResult<Bytes> {
        if handle.owner != self.instance {
            return Err(SftpWsError::InvalidHandle);
        }
        Ok(handle.bytes.clone())
    }

    /// Opens a remote file.
    pub async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: Option<&FileAttributes>,
    ) -> SftpWsResult<SftpHandle> {
        self.handle(Request::Open {
            path: path.to_string(),
            pflags: flags,
            attrs: attrs.cloned().unwrap_or_default(),
        })
        .await
    }

    /// Closes a file or directory handle.
    pub async fn close(&self, handle: &SftpHandle) -> SftpWsResult<()> {
        self.void(Request::Close {
            handle: self.wire(handle)?,
        })
        .await
    }

    /// Reads up to `length` bytes at `offset`.
    ///
    /// The length is clamped to `max_read_block_length`. An empty result
    /// means end of file.
    pub async fn read(&self, handle: &SftpHandle, offset: u64, length: u32) -> SftpWsResult<Bytes> {
        let request = Request::Read {
            handle: self.wire(handle)?,
            offset,
            length: length.min(self.config.max_read_block_length),
        };
        match self.request(request, ExpectedReply::Data).await? {
            Reply::Data(data) => Ok(data),
            other => Err(other.unexpected()),
        }
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`SftpWsError::InvalidInput`] without sending anything if
    /// `data` is longer than `max_write_block_length`.
    pub async fn write(&self, handle: &SftpHandle, offset: u64, data: &[u8]) -> SftpWsResult<()> {
        if data.len() > self.config.max_write_block_length as usize {
            return Err(SftpWsError::InvalidInput(
                "Length exceeds maximum allowed data block length".to_string(),
            ));
        }
        self.void(Request::Write {
            handle: self.wire(handle)?,
            offset,
            data: Bytes::copy_from_slice(data),
        })
        .await
    }

    /// Stats a path without following a final symlink.
    pub async fn lstat(&self, path: &str) -> SftpWsResult<FileAttributes> {
        self.attrs(Request::Lstat {
            path: path.to_string(),
        })
        .await
    }

    /// Stats a path.
    pub async fn stat(&self, path: &str) -> SftpWsResult<FileAttributes> {
        self.attrs(Request::Stat {
            path: path.to_string(),
        })
        .await
    }

    /// Stats an open handle.
    pub async fn fstat(&self, handle: &SftpHandle) -> SftpWsResult<FileAttributes> {
        self.attrs(Request::Fstat {
            handle: self.wire(handle)?,
        })
        .await
    }

    /// Applies attributes to a path.
    pub async fn setstat(&self, path: &str, attrs: &FileAttributes) -> SftpWsResult<()> {
        self.void(Request::Setstat {
            path: path.to_string(),
            attrs: attrs.clone(),
        })
        .await
    }

    /// Applies attributes to an open handle.
    pub async fn fsetstat(&self, handle: &SftpHandle, attrs: &FileAttributes) -> SftpWsResult<()> {
        self.void(Request::Fsetstat {
            handle: self.wire(handle)?,
            attrs: attrs.clone(),
        })
        .await
    }

    /// Opens a directory for listing.
    pub async fn opendir(&self, path: &str) -> SftpWsResult<SftpHandle> {
        self.handle(Request::Opendir {
            path: path.to_string(),
        })
        .await
    }

    /// Returns the next batch of entries, or `None` at the end of the listing.
    pub async fn readdir(&self, handle: &SftpHandle) -> SftpWsResult<Option<Vec<NameEntry>>> {
        let request = Request::Readdir {
            handle: self.wire(handle)?,
        };
        match self.request(request, ExpectedReply::Listing).await? {
            Reply::Name(entries) => Ok(Some(entries)),
            Reply::EndOfListing => Ok(None),
            other => Err(other.unexpected()),
        }
    }

    /// Removes a file.
    pub async fn unlink(&self, path: &str) -> SftpWsResult<()> {
        self.void(Request::Remove {
            path: path.to_string(),
        })
        .await
    }

    /// Creates a directory.
    pub async fn mkdir(&self, path: &str, attrs: Option<&FileAttributes>) -> SftpWsResult<()> {
        self.void(Request::Mkdir {
            path: path.to_string(),
            attrs: attrs.cloned().unwrap_or_default(),
        })
        .await
    }

    /// Removes an empty directory.
    pub async fn rmdir(&self, path: &str) -> SftpWsResult<()> {
        self.void(Request::Rmdir {
            path: path.to_string(),
        })
        .await
    }

    /// Canonicalizes a path on the server.
    pub async fn realpath(&self, path: &str) -> SftpWsResult<String> {
        self.single_name(Request::Realpath {
            path: path.to_string(),
        })
        .await
    }

    /// Renames a file or directory.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> SftpWsResult<()> {
        self.void(Request::Rename {
            old_path: old_path.to_string(),
            new_path: new_path.to_string(),
        })
        .await
    }

    /// Reads a symlink target.
    pub async fn readlink(&self, path: &str) -> SftpWsResult<String> {
        self.single_name(Request::Readlink {
            path: path.to_string(),
        })
        .await
    }

    /// Creates `link_path` pointing at `target_path`.
    pub async fn symlink(&self, target_path: &str, link_path: &str) -> SftpWsResult<()> {
        self.void(Request::Symlink {
            target_path: target_path.to_string(),
            link_path: link_path.to_string(),
        })
        .await
    }
}

impl Drop for SftpClient {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}
