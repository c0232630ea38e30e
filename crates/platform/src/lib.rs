//! # sftpws platform
//!
//! Shared types for the SFTP-over-WebSocket workspace.
//!
//! This crate provides the unified error type used by every layer of the
//! protocol stack (`SftpWsError`, `SftpWsResult`).
//!
//! # Examples
//!
//! ```
//! use sftpws_platform::{SftpWsError, SftpWsResult};
//!
//! fn lookup(found: bool) -> SftpWsResult<u32> {
//!     if found {
//!         Ok(7)
//!     } else {
//!         Err(SftpWsError::status(2, "No such file"))
//!     }
//! }
//!
//! # fn main() -> SftpWsResult<()> {
//! assert_eq!(lookup(true)?, 7);
//! assert_eq!(lookup(false).unwrap_err().status_code(), Some(2));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{SftpWsError, SftpWsResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
