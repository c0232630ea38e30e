//! Message transport.
//!
//! SFTP frames travel as individual binary messages over a full-duplex,
//! message-oriented channel. The session logic only depends on the
//! [`ChannelSender`] / [`ChannelReceiver`] pair defined here; [`memory`]
//! provides an in-process implementation and `websocket` (feature
//! `websocket`) adapts `tokio-tungstenite`.

use bytes::Bytes;
use sftpws_platform::SftpWsResult;

/// Message received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// One SFTP frame
    Binary(Bytes),
    /// Text payload (not valid for SFTP)
    Text(String),
    /// Peer closed the channel, with its close code if any
    Close(Option<u16>),
}

/// Why a channel is being closed. Values are WebSocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly shutdown
    Normal,
    /// Endpoint is going away
    GoingAway,
    /// Framing or protocol violation
    ProtocolError,
    /// Peer sent a message type we do not accept
    UnsupportedData,
    /// Internal failure while handling a request
    UnexpectedCondition,
}

impl CloseReason {
    /// Returns the WebSocket close code.
    pub fn code(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnsupportedData => 1003,
            Self::UnexpectedCondition => 1011,
        }
    }

    /// Returns the close reason text.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal closure",
            Self::GoingAway => "Going away",
            Self::ProtocolError => "Protocol error",
            Self::UnsupportedData => "Unsupported data",
            Self::UnexpectedCondition => "Unexpected condition",
        }
    }

    /// Converts a close code back into a reason.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1001 => Some(Self::GoingAway),
            1002 => Some(Self::ProtocolError),
            1003 => Some(Self::UnsupportedData),
            1011 => Some(Self::UnexpectedCondition),
            _ => None,
        }
    }
}

/// Outbound half of a channel.
#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    /// Sends one frame as a binary message.
    async fn send(&self, frame: Bytes) -> SftpWsResult<()>;

    /// Closes the channel with the given reason.
    async fn close(&self, reason: CloseReason) -> SftpWsResult<()>;
}

/// Inbound half of a channel.
#[async_trait::async_trait]
pub trait ChannelReceiver: Send {
    /// Waits for the next message. `Ok(None)` means the channel is gone.
    async fn recv(&mut self) -> SftpWsResult<Option<ChannelMessage>>;
}

#[async_trait::async_trait]
impl<T: ChannelSender + ?Sized> ChannelSender for Box<T> {
    async fn send(&self, frame: Bytes) -> SftpWsResult<()> {
        (**self).send(frame).await
    }

    async fn close(&self, reason: CloseReason) -> SftpWsResult<()> {
        (**self).close(reason).await
    }
}

#[async_trait::async_trait]
impl<T: ChannelReceiver + ?Sized> ChannelReceiver for Box<T> {
    async fn recv(&mut self) -> SftpWsResult<Option<ChannelMessage>> {
        (**self).recv().await
    }
}

/// In-process channel over unbounded mpsc queues.
pub mod memory {
    use super::*;
    use sftpws_platform::SftpWsError;
    use tokio::sync::mpsc;

    /// Sending half of an in-memory channel.
    #[derive(Debug, Clone)]
    pub struct MemorySender {
        tx: mpsc::UnboundedSender<ChannelMessage>,
    }

    impl MemorySender {
        /// Sends a text message; SFTP peers treat this as a violation.
        pub fn send_text(&self, text: impl Into<String>) -> SftpWsResult<()> {
            self.tx
                .send(ChannelMessage::Text(text.into()))
                .map_err(|_| SftpWsError::Closed)
        }

        /// Sends raw bytes without any framing checks.
        pub fn send_raw(&self, data: impl Into<Bytes>) -> SftpWsResult<()> {
            self.tx
                .send(ChannelMessage::Binary(data.into()))
                .map_err(|_| SftpWsError::Closed)
        }
    }

    #[async_trait::async_trait]
    impl ChannelSender for MemorySender {
        async fn send(&self, frame: Bytes) -> SftpWsResult<()> {
            self.send_raw(frame)
        }

        async fn close(&self, reason: CloseReason) -> SftpWsResult<()> {
            // peer may already be gone
            let _ = self.tx.send(ChannelMessage::Close(Some(reason.code())));
            Ok(())
        }
    }

    /// Receiving half of an in-memory channel.
    #[derive(Debug)]
    pub struct MemoryReceiver {
        rx: mpsc::UnboundedReceiver<ChannelMessage>,
    }

    #[async_trait::async_trait]
    impl ChannelReceiver for MemoryReceiver {
        async fn recv(&mut self) -> SftpWsResult<Option<ChannelMessage>> {
            Ok(self.rx.recv().await)
        }
    }

    /// One side of a connected pair.
    pub type Endpoint = (MemorySender, MemoryReceiver);

    /// Creates two connected endpoints.
    pub fn pair() -> (Endpoint, Endpoint) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            (MemorySender { tx: a_tx }, MemoryReceiver { rx: b_rx }),
            (MemorySender { tx: b_tx }, MemoryReceiver { rx: a_rx }),
        )
    }
}

/// WebSocket transport over `tokio-tungstenite`.
#[cfg(feature = "websocket")]
pub mod websocket {
    use super::*;
    use futures::stream::{SplitSink, SplitStream};
    use futures::{SinkExt, StreamExt};
    use sftpws_platform::SftpWsError;
    use std::borrow::Cow;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::sync::Mutex;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};
    use tokio_tungstenite::WebSocketStream;

    pub(crate) fn ws_error(err: WsError) -> SftpWsError {
        match err {
            WsError::Io(e) => SftpWsError::Io(e),
            WsError::ConnectionClosed | WsError::AlreadyClosed => SftpWsError::Closed,
            other => SftpWsError::Other(Box::new(other)),
        }
    }

    /// Sending half of a WebSocket.
    pub struct WebSocketSender<S> {
        sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    }

    /// Receiving half of a WebSocket.
    pub struct WebSocketReceiver<S> {
        stream: SplitStream<WebSocketStream<S>>,
    }

    /// Splits an upgraded WebSocket into channel halves.
    pub fn split<S>(ws: WebSocketStream<S>) -> (WebSocketSender<S>, WebSocketReceiver<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (sink, stream) = ws.split();
        (
            WebSocketSender {
                sink: Mutex::new(sink),
            },
            WebSocketReceiver { stream },
        )
    }

    #[async_trait::async_trait]
    impl<S> ChannelSender for WebSocketSender<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        async fn send(&self, frame: Bytes) -> SftpWsResult<()> {
            self.sink
                .lock()
                .await
                .send(Message::Binary(frame.to_vec()))
                .await
                .map_err(ws_error)
        }

        async fn close(&self, reason: CloseReason) -> SftpWsResult<()> {
            let frame = CloseFrame {
                code: CloseCode::from(reason.code()),
                reason: Cow::Borrowed(reason.description()),
            };
            let mut sink = self.sink.lock().await;
            match sink.send(Message::Close(Some(frame))).await {
                Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
                Err(e) => Err(ws_error(e)),
            }
        }
    }

    #[async_trait::async_trait]
    impl<S> ChannelReceiver for WebSocketReceiver<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        async fn recv(&mut self) -> SftpWsResult<Option<ChannelMessage>> {
            loop {
                let message = match self.stream.next().await {
                    None => return Ok(None),
                    Some(Ok(message)) => message,
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                        return Ok(None)
                    }
                    Some(Err(e)) => return Err(ws_error(e)),
                };

                return Ok(Some(match message {
                    Message::Binary(data) => ChannelMessage::Binary(Bytes::from(data)),
                    Message::Text(text) => ChannelMessage::Text(text),
                    Message::Close(frame) => ChannelMessage::Close(frame.map(|f| u16::from(f.code))),
                    // control frames are answered by tungstenite
                    _ => continue,
                }));
            }
        }
    }
}
