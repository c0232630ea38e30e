//! SFTP server.
//!
//! One [`SftpSession`] serves one connection. It owns a [`SafeFilesystem`]
//! for that connection only, decodes each inbound frame, runs the request
//! against the backend on a spawned task and sends exactly one reply per
//! request. Replies go out in completion order; clients correlate by id.
//!
//! # Example
//!
//! ```rust,no_run
//! use sftpws_proto::sftp::{LocalFilesystem, SftpServer, SftpServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SftpServerConfig::new().with_virtual_root("/srv/files");
//! let server = SftpServer::bind("127.0.0.1:8022", config, LocalFilesystem::new()).await?;
//! println!("SFTP over WebSocket on ws://{}", server.local_addr()?);
//!
//! server.serve().await?;
//! # Ok(())
//! # }
//! ```

use super::channel::{ChannelMessage, ChannelReceiver, ChannelSender, CloseReason};
use super::codec::Frame;
use super::config::SftpServerConfig;
use super::fs::FileSystem;
use super::logging;
use super::message::{MessageType, Request, Response, SFTP_VERSION};
use super::safe::{LocalHandle, SafeFilesystem};
use super::status::SftpStatus;
use super::types::NameEntry;
use bytes::Bytes;
use sftpws_platform::{SftpWsError, SftpWsResult};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for SSH_FXP_INIT
    Uninitialized,
    /// Handshake done, serving requests
    Ready,
    /// Connection finished
    Closed,
}

/// Reason to tear the connection down.
type Shutdown = (CloseReason, String);

/// Server side of one SFTP connection.
pub struct SftpSession<F: FileSystem> {
    peer: String,
    fs: Arc<SafeFilesystem<F>>,
    sender: Arc<dyn ChannelSender>,
    receiver: Box<dyn ChannelReceiver>,
    state: SessionState,
    max_read_length: u32,
    tasks: JoinSet<SftpWsResult<()>>,
}

impl<F: FileSystem> SftpSession<F> {
    /// Creates a session serving `fs` over the given channel halves.
    ///
    /// # Errors
    ///
    /// Returns [`SftpWsError::Config`] if `config` is invalid.
    pub fn new<S, R>(
        fs: Arc<F>,
        config: &SftpServerConfig,
        sender: S,
        receiver: R,
    ) -> SftpWsResult<Self>
    where
        S: ChannelSender + 'static,
        R: ChannelReceiver + 'static,
    {
        config.validate()?;
        Ok(Self {
            peer: "unknown".to_string(),
            fs: Arc::new(SafeFilesystem::from_config(fs, config)?),
            sender: Arc::new(sender),
            receiver: Box::new(receiver),
            state: SessionState::Uninitialized,
            max_read_length: config.max_read_length,
            tasks: JoinSet::new(),
        })
    }

    /// Sets the peer label used in logs.
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serves the connection until either side closes it.
    ///
    /// Pending backend calls are aborted and every handle still open is
    /// closed before this returns.
    pub async fn run(mut self) -> SftpWsResult<()> {
        logging::session_started(&self.peer, self.fs.root(), self.fs.is_read_only());

        let shutdown: Option<Shutdown> = loop {
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Ok(Some(ChannelMessage::Binary(data))) => {
                        if let Err(shutdown) = self.handle_frame(data) {
                            break Some(shutdown);
                        }
                    }
                    Ok(Some(ChannelMessage::Text(_))) => {
                        break Some((CloseReason::UnsupportedData, "Text message received".to_string()));
                    }
                    Ok(Some(ChannelMessage::Close(code))) => {
                        debug!(peer = %self.peer, ?code, "Peer closed the channel");
                        break None;
                    }
                    Ok(None) => break None,
                    Err(e) => {
                        warn!(peer = %self.peer, error = %e, "Channel receive failed");
                        break None;
                    }
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(peer = %self.peer, error = %e, "Reply could not be sent");
                        break None;
                    }
                    Err(e) if e.is_panic() => {
                        break Some((CloseReason::UnexpectedCondition, "Request handler panicked".to_string()));
                    }
                    Err(_) => {}
                },
            }
        };

        self.state = SessionState::Closed;
        self.tasks.abort_all();
        // let aborted tasks settle so no handle lands in the table after dispose
        while self.tasks.join_next().await.is_some() {}

        let reason = match shutdown {
            Some((reason, detail)) => {
                logging::protocol_violation(&self.peer, &detail);
                if let Err(e) = self.sender.close(reason).await {
                    debug!(peer = %self.peer, error = %e, "Close failed");
                }
                reason.description()
            }
            None => CloseReason::Normal.description(),
        };

        self.fs.dispose().await;
        logging::session_closed(&self.peer, reason);
        Ok(())
    }

    /// Handles one inbound frame. Returns the close reason on fatal errors.
    fn handle_frame(&mut self, data: Bytes) -> Result<(), Shutdown> {
        let mut frame =
            Frame::parse(&data).map_err(|e| (CloseReason::ProtocolError, e.to_string()))?;

        match self.state {
            SessionState::Uninitialized => {
                if frame.kind != MessageType::Init as u8 {
                    return Err((
                        CloseReason::ProtocolError,
                        format!("Expected SSH_FXP_INIT, got type {}", frame.kind),
                    ));
                }
                let version = frame
                    .payload
                    .read_u32()
                    .map_err(|e| (CloseReason::ProtocolError, e.to_string()))?;
                if version < SFTP_VERSION {
                    return Err((
                        CloseReason::ProtocolError,
                        format!("Unsupported SFTP version {}", version),
                    ));
                }

                self.state = SessionState::Ready;
                logging::handshake_complete(&self.peer, SFTP_VERSION);
                self.reply(0, Response::Version {
                    version: SFTP_VERSION,
                });
                Ok(())
            }
            SessionState::Ready => {
                let Some(id) = frame.id else {
                    return Err((
                        CloseReason::ProtocolError,
                        format!("Unexpected handshake message of type {}", frame.kind),
                    ));
                };

                let request = Request::decode(frame.kind, &mut frame.payload)
                    .map_err(|e| (CloseReason::UnexpectedCondition, e.to_string()))?;

                match request {
                    Some(request) => self.dispatch(id, request),
                    None => {
                        debug!(peer = %self.peer, request_id = id, kind = frame.kind, "Unsupported request");
                        self.reply(id, SftpStatus::unsupported().into_response());
                    }
                }
                Ok(())
            }
            SessionState::Closed => Ok(()),
        }
    }

    fn reply(&mut self, id: u32, response: Response) {
        let sender = self.sender.clone();
        self.tasks.spawn(async move { sender.send(response.encode(id)).await });
    }

    fn dispatch(&mut self, id: u32, request: Request) {
        let kind = request.kind();
        logging::request_dispatched(id, kind, request.handle().map(|h| &h[..]));

        let fs = self.fs.clone();
        let sender = self.sender.clone();
        let max_read_length = self.max_read_length;

        self.tasks.spawn(async move {
            let response = match execute(&fs, request, max_read_length).await {
                Ok(response) => response,
                Err(err) => {
                    let status = SftpStatus::from_error(&err);
                    logging::request_failed(id, kind, status.code as u32, &status.message);
                    status.into_response()
                }
            };
            sender.send(response.encode(id)).await
        });
    }
}

fn ok() -> Response {
    SftpStatus::ok().into_response()
}

fn eof() -> Response {
    SftpStatus::eof().into_response()
}

/// Runs one request against the sandbox and builds its reply.
async fn execute<F: FileSystem>(
    fs: &SafeFilesystem<F>,
    request: Request,
    max_read_length: u32,
) -> SftpWsResult<Response> {
    let handle = |bytes: &Bytes| LocalHandle::from_wire(bytes);

    let response = match request {
        Request::Open {
            path,
            pflags,
            attrs,
        } => Response::Handle(fs.open(&path, pflags, &attrs).await?.to_wire()),
        Request::Close { handle: h } => {
            fs.close(handle(&h)?).await?;
            ok()
        }
        Request::Read {
            handle: h,
            offset,
            length,
        } => {
            if length == 0 {
                return Ok(Response::Data(Bytes::new()));
            }
            let data = fs.read(handle(&h)?, offset, length.min(max_read_length)).await?;
            if data.is_empty() {
                eof()
            } else {
                Response::Data(data)
            }
        }
        Request::Write {
            handle: h,
            offset,
            data,
        } => {
            fs.write(handle(&h)?, offset, &data).await?;
            ok()
        }
        Request::Lstat { path } => Response::Attrs(fs.lstat(&path).await?),
        Request::Fstat { handle: h } => Response::Attrs(fs.fstat(handle(&h)?).await?),
        Request::Setstat { path, attrs } => {
            fs.setstat(&path, &attrs).await?;
            ok()
        }
        Request::Fsetstat { handle: h, attrs } => {
            fs.fsetstat(handle(&h)?, &attrs).await?;
            ok()
        }
        Request::Opendir { path } => Response::Handle(fs.opendir(&path).await?.to_wire()),
        Request::Readdir { handle: h } => match fs.readdir(handle(&h)?).await? {
            Some(entries) if !entries.is_empty() => Response::Name(entries),
            _ => eof(),
        },
        Request::Remove { path } => {
            fs.unlink(&path).await?;
            ok()
        }
        Request::Mkdir { path, attrs } => {
            fs.mkdir(&path, &attrs).await?;
            ok()
        }
        Request::Rmdir { path } => {
            fs.rmdir(&path).await?;
            ok()
        }
        Request::Realpath { path } => {
            Response::Name(vec![NameEntry::path(fs.realpath(&path).await?)])
        }
        Request::Stat { path } => Response::Attrs(fs.stat(&path).await?),
        Request::Rename { old_path, new_path } => {
            fs.rename(&old_path, &new_path).await?;
            ok()
        }
        Request::Readlink { path } => {
            Response::Name(vec![NameEntry::path(fs.readlink(&path).await?)])
        }
        Request::Symlink {
            target_path,
            link_path,
        } => {
            fs.symlink(&target_path, &link_path).await?;
            ok()
        }
        Request::Init { .. } => {
            return Err(SftpWsError::Protocol("Duplicate SSH_FXP_INIT".to_string()))
        }
    };

    Ok(response)
}

/// WebSocket accept loop.
#[cfg(feature = "websocket")]
pub struct SftpServer<F: FileSystem> {
    listener: tokio::net::TcpListener,
    config: SftpServerConfig,
    fs: Arc<F>,
}

#[cfg(feature = "websocket")]
impl<F: FileSystem> SftpServer<F> {
    /// Binds a listener. Every accepted connection gets its own sandbox over
    /// the shared backend.
    pub async fn bind<A>(addr: A, config: SftpServerConfig, fs: F) -> SftpWsResult<Self>
    where
        A: tokio::net::ToSocketAddrs,
    {
        config.validate()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config,
            fs: Arc::new(fs),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SftpWsResult<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SftpServerConfig {
        &self.config
    }

    /// Accepts one connection and completes the WebSocket upgrade.
    pub async fn accept(&self) -> SftpWsResult<SftpSession<F>> {
        let (stream, peer) = self.listener.accept().await?;
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(super::channel::websocket::ws_error)?;
        let (sender, receiver) = super::channel::websocket::split(ws);
        let session = SftpSession::new(self.fs.clone(), &self.config, sender, receiver)?;
        Ok(session.with_peer(peer.to_string()))
    }

    /// Accepts connections forever, one task per session.
    pub async fn serve(self) -> SftpWsResult<()> {
        loop {
            match self.accept().await {
                Ok(session) => {
                    tokio::spawn(async move {
                        if let Err(e) = session.run().await {
                            warn!(error = %e, "Session ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::channel::memory::{pair, MemoryReceiver, MemorySender};
    use crate::sftp::codec::PacketWriter;
    use crate::sftp::safe::tests::CountingFs;
    use crate::sftp::types::{FileAttributes, OpenFlags, StatusCode};
    use std::sync::atomic::Ordering;
    use tokio::task::JoinHandle;

    struct Harness {
        tx: MemorySender,
        rx: MemoryReceiver,
        fs: Arc<CountingFs>,
        session: JoinHandle<SftpWsResult<()>>,
    }

    impl Harness {
        fn start(config: SftpServerConfig) -> Self {
            let (client, server) = pair();
            let fs = Arc::new(CountingFs::default());
            let session = SftpSession::new(fs.clone(), &config, server.0, server.1).unwrap();
            Self {
                tx: client.0,
                rx: client.1,
                fs,
                session: tokio::spawn(session.run()),
            }
        }

        async fn send(&self, frame: Bytes) {
            self.tx.send(frame).await.unwrap();
        }

        async fn next(&mut self) -> ChannelMessage {
            self.rx.recv().await.unwrap().expect("channel open")
        }

        async fn response(&mut self) -> (Option<u32>, Response) {
            match self.next().await {
                ChannelMessage::Binary(data) => {
                    let mut frame = Frame::parse(&data).unwrap();
                    let response = Response::decode(frame.kind, &mut frame.payload).unwrap();
                    (frame.id, response)
                }
                other => panic!("Expected binary frame, got {:?}", other),
            }
        }

        async fn init(&mut self) {
            self.send(Request::Init { version: 3 }.encode(0)).await;
            assert_eq!(self.response().await, (None, Response::Version { version: 3 }));
        }

        async fn expect_close(&mut self, reason: CloseReason) {
            assert_eq!(self.next().await, ChannelMessage::Close(Some(reason.code())));
        }
    }

    fn status(code: StatusCode, message: &str) -> Response {
        Response::Status {
            code: code as u32,
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_newer_client_version_gets_v3() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.send(Request::Init { version: 6 }.encode(0)).await;
        assert_eq!(h.response().await, (None, Response::Version { version: 3 }));
    }

    #[tokio::test]
    async fn test_older_client_version_is_rejected() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.send(Request::Init { version: 2 }.encode(0)).await;
        h.expect_close(CloseReason::ProtocolError).await;
        h.session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_before_init_closes() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.send(Request::Stat { path: "/".into() }.encode(1)).await;
        h.expect_close(CloseReason::ProtocolError).await;
        assert_eq!(h.fs.call_count(), 0);
    }

    #[tokio::test]
    async fn test_text_message_closes_with_unsupported_data() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        h.tx.send_text("hello").unwrap();
        h.expect_close(CloseReason::UnsupportedData).await;
    }

    #[tokio::test]
    async fn test_framing_error_closes_without_reply() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        h.tx.send_raw(vec![0, 0, 0, 9, 17, 0, 0]).unwrap();
        h.expect_close(CloseReason::ProtocolError).await;
    }

    #[tokio::test]
    async fn test_payload_decode_error_closes_with_unexpected_condition() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        // READ whose handle length runs past the end
        h.tx.send_raw(vec![0, 0, 0, 9, 5, 0, 0, 0, 1, 0, 0, 0, 40]).unwrap();
        h.expect_close(CloseReason::UnexpectedCondition).await;
        assert_eq!(h.fs.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extended_request_is_unsupported() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        let mut w = PacketWriter::new(MessageType::Extended, 8);
        w.write_string("posix-rename@openssh.com");
        h.send(w.finish()).await;
        assert_eq!(
            h.response().await,
            (Some(8), status(StatusCode::OpUnsupported, "Operation not supported"))
        );
    }

    #[tokio::test]
    async fn test_invalid_handle_reply() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        h.send(
            Request::Close {
                handle: Bytes::from_static(&[0, 0, 0, 9]),
            }
            .encode(4),
        )
        .await;
        assert_eq!(
            h.response().await,
            (Some(4), status(StatusCode::Failure, "Invalid handle"))
        );
        assert_eq!(h.fs.call_count(), 0);
    }

    #[tokio::test]
    async fn test_read_only_write_is_refused() {
        let config = SftpServerConfig::new().with_read_only(true);
        let mut h = Harness::start(config);
        h.init().await;

        h.send(
            Request::Open {
                path: "/a.txt".into(),
                pflags: OpenFlags::from_mode("w").unwrap(),
                attrs: FileAttributes::new(),
            }
            .encode(2),
        )
        .await;
        assert_eq!(
            h.response().await,
            (Some(2), status(StatusCode::Failure, "Internal server error"))
        );
        h.send(Request::Mkdir { path: "/d".into(), attrs: FileAttributes::new() }.encode(3))
            .await;
        assert_eq!(
            h.response().await,
            (Some(3), status(StatusCode::Failure, "Internal server error"))
        );
        assert_eq!(h.fs.call_count(), 0);
    }

    #[tokio::test]
    async fn test_read_at_eof_replies_eof() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        h.send(
            Request::Open {
                path: "/a".into(),
                pflags: OpenFlags::READ,
                attrs: FileAttributes::new(),
            }
            .encode(1),
        )
        .await;
        let (_, Response::Handle(handle)) = h.response().await else {
            panic!("Expected handle");
        };

        h.send(Request::Read { handle: handle.clone(), offset: 0, length: 10 }.encode(2))
            .await;
        assert_eq!(h.response().await, (Some(2), status(StatusCode::Eof, "End of file")));

        h.send(Request::Readdir { handle }.encode(3)).await;
        assert_eq!(h.response().await, (Some(3), status(StatusCode::Eof, "End of file")));
    }

    #[tokio::test]
    async fn test_realpath_single_name() {
        let mut h = Harness::start(SftpServerConfig::new().with_virtual_root("/srv"));
        h.init().await;
        h.send(Request::Realpath { path: "a/../b".into() }.encode(6)).await;
        assert_eq!(
            h.response().await,
            (Some(6), Response::Name(vec![NameEntry::path("/b")]))
        );
    }

    #[tokio::test]
    async fn test_disconnect_disposes_handles() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        for id in 1..=2 {
            h.send(
                Request::Open {
                    path: format!("/f{}", id),
                    pflags: OpenFlags::READ,
                    attrs: FileAttributes::new(),
                }
                .encode(id),
            )
            .await;
            assert!(matches!(h.response().await, (_, Response::Handle(_))));
        }

        h.tx.close(CloseReason::Normal).await.unwrap();
        h.session.await.unwrap().unwrap();
        assert_eq!(h.fs.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_with_opens_in_flight_leaks_nothing() {
        let mut h = Harness::start(SftpServerConfig::default());
        h.init().await;
        for id in 1..=32 {
            h.send(
                Request::Open {
                    path: format!("/f{}", id),
                    pflags: OpenFlags::READ,
                    attrs: FileAttributes::new(),
                }
                .encode(id),
            )
            .await;
        }
        h.tx.close(CloseReason::Normal).await.unwrap();
        h.session.await.unwrap().unwrap();

        // handles caught mid-registration are closed on a background task
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while h.fs.close_count() != h.fs.open_count() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
