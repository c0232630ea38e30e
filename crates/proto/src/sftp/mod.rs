//! SFTP v3 over WebSocket.
//!
//! Each binary WebSocket message carries exactly one SFTP packet
//! (length-prefixed, as in draft-ietf-secsh-filexfer-02). Text messages are
//! a protocol violation. There is no SSH layer underneath.
//!
//! # Architecture
//!
//! 1. **Codec** ([`codec`], [`message`], [`types`]) - frame parsing and
//!    typed requests/replies
//! 2. **Channel** ([`channel`]) - message transport (WebSocket or in-memory)
//! 3. **Server** ([`server`]) - session dispatcher over a [`SafeFilesystem`]
//!    sandboxing any [`FileSystem`] backend
//! 4. **Client** ([`client`], [`transfer`]) - request correlation and
//!    composite operations
//!
//! # Protocol Flow
//!
//! ```text
//! Client                          Server
//!   |                               |
//!   |== WebSocket upgrade ========> |
//!   |                               |
//!   |-- SSH_FXP_INIT -------------->|
//!   |<- SSH_FXP_VERSION ------------|
//!   |                               |
//!   |-- SSH_FXP_OPEN (id 1) ------->|
//!   |-- SSH_FXP_STAT (id 2) ------->|
//!   |<- SSH_FXP_ATTRS (id 2) -------|  (replies may arrive out of order)
//!   |<- SSH_FXP_HANDLE (id 1) ------|
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sftpws_proto::sftp::{LocalFilesystem, SftpClient, SftpClientConfig, SftpServer, SftpServerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SftpServerConfig::new().with_virtual_root("/srv/files");
//! let server = SftpServer::bind("127.0.0.1:4002", config, LocalFilesystem::new()).await?;
//! tokio::spawn(server.serve());
//!
//! let client = SftpClient::connect_ws("ws://127.0.0.1:4002", SftpClientConfig::new()).await?;
//! client.write_file("/hello.txt", b"hello").await?;
//! for entry in client.list("/").await? {
//!     println!("{}", entry.longname);
//! }
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod codec;
pub mod config;
pub mod fs;
pub mod local;
pub mod logging;
pub mod message;
pub mod safe;
pub mod server;
pub mod status;
pub mod transfer;
pub mod types;
pub mod utf8;

pub use channel::{ChannelMessage, ChannelReceiver, ChannelSender, CloseReason};
pub use client::{SftpClient, SftpHandle};
pub use config::{SftpClientConfig, SftpServerConfig};
pub use fs::FileSystem;
pub use local::LocalFilesystem;
pub use message::{MessageType, Request, Response, SFTP_VERSION};
pub use safe::{LocalHandle, SafeFilesystem};
pub use server::{SessionState, SftpSession};
#[cfg(feature = "websocket")]
pub use server::SftpServer;
pub use status::SftpStatus;
pub use transfer::TransferProgress;
pub use types::{FileAttributes, FileMode, FileType, NameEntry, OpenFlags, StatusCode};
