//! SFTP v3 client and server tunneled over WebSocket.
//!
//! This crate provides:
//!
//! - **Codec** - SFTP v3 packet framing, attributes and status replies
//! - **Server** - per-connection dispatcher with a sandboxed, optionally
//!   read-only view of a pluggable file system
//! - **Client** - concurrent request/reply correlation plus directory
//!   listing and chunked transfer
//!
//! # Features
//!
//! - `websocket` (default) - WebSocket transport via `tokio-tungstenite`
//!
//! # Example
//!
//! ```rust
//! use sftpws_proto::sftp::{Request, Response};
//! use sftpws_proto::sftp::codec::Frame;
//!
//! // Encode a STAT request
//! let wire = Request::Stat { path: "/etc".into() }.encode(7);
//!
//! // Parse it back
//! let mut frame = Frame::parse(&wire).unwrap();
//! assert_eq!(frame.id, Some(7));
//! let request = Request::decode(frame.kind, &mut frame.payload).unwrap();
//! assert_eq!(request, Some(Request::Stat { path: "/etc".into() }));
//!
//! // Replies use the same framing
//! let reply = Response::Status { code: 0, message: "OK".into() }.encode(7);
//! assert_eq!(Frame::parse(&reply).unwrap().id, Some(7));
//! ```
//!
//! # References
//!
//! - [SFTP Draft v3](https://datatracker.ietf.org/doc/html/draft-ietf-secsh-filexfer-02)
//! - [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455) - The WebSocket Protocol

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod sftp;

pub use sftpws_platform::{SftpWsError, SftpWsResult};
