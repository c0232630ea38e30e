//! Structured logging for SFTP sessions
//!
//! Thin wrappers around `tracing` so that every session emits the same
//! field names. Handles are logged as hex.
//!
//! # Log Levels
//!
//! - **TRACE**: Transfer progress
//! - **DEBUG**: Individual requests and their outcome
//! - **INFO**: Session start/end, handshake
//! - **WARN**: Protocol violations, refused operations
//!
//! # Example
//!
//! ```no_run
//! use sftpws_proto::sftp::logging;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("sftpws_proto=debug")
//!     .init();
//!
//! logging::session_started("127.0.0.1:50122", "/srv/files", false);
//! ```

use super::message::MessageType;
use tracing::{debug, info, trace, warn};

/// Log the start of a server session
///
/// # Arguments
///
/// * `peer` - Remote address
/// * `root` - Virtual root the session is confined to
/// * `read_only` - Whether mutations are refused
pub fn session_started(peer: &str, root: &str, read_only: bool) {
    info!(peer = peer, root = root, read_only = read_only, "SFTP session started");
}

/// Log the end of a server or client session
pub fn session_closed(peer: &str, reason: &str) {
    info!(peer = peer, reason = reason, "SFTP session closed");
}

/// Log a completed version handshake
pub fn handshake_complete(peer: &str, version: u32) {
    info!(peer = peer, version = version, "SFTP handshake complete");
}

/// Log a request handed to the backend
///
/// # Arguments
///
/// * `id` - Request id
/// * `kind` - Request type
/// * `handle` - Wire handle, for handle-based requests
pub fn request_dispatched(id: u32, kind: MessageType, handle: Option<&[u8]>) {
    match handle {
        Some(handle) => debug!(
            request_id = id,
            op = kind.name(),
            handle = %hex::encode(handle),
            "Request dispatched"
        ),
        None => debug!(request_id = id, op = kind.name(), "Request dispatched"),
    }
}

/// Log a request that completed with a non-OK status
pub fn request_failed(id: u32, kind: MessageType, code: u32, message: &str) {
    debug!(
        request_id = id,
        op = kind.name(),
        status = code,
        message = message,
        "Request failed"
    );
}

/// Log a protocol violation that ends the session
///
/// # Arguments
///
/// * `peer` - Remote address
/// * `detail` - What was wrong
pub fn protocol_violation(peer: &str, detail: &str) {
    warn!(peer = peer, detail = detail, "SFTP protocol violation");
}

/// Log transfer progress
///
/// # Arguments
///
/// * `path` - Remote path
/// * `transferred` - Bytes moved so far
/// * `total` - Expected size, if known
pub fn transfer_progress(path: &str, transferred: u64, total: Option<u64>) {
    match total {
        Some(total) => trace!(path = path, transferred = transferred, total = total, "Transfer progress"),
        None => trace!(path = path, transferred = transferred, "Transfer progress"),
    }
}
