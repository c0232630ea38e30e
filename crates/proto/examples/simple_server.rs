//! Simple SFTP-over-WebSocket Server Example
//!
//! This example demonstrates how to:
//! - Serve a local directory as the client's `/`
//! - Optionally refuse every mutating request
//! - Accept WebSocket connections, one session task each
//!
//! Usage:
//!   cargo run --example simple_server [bind_address] [root] [--read-only]
//!
//! Example:
//!   cargo run --example simple_server 127.0.0.1:4002 /tmp/share
//!
//! Then connect with a client:
//!   cargo run --example simple_client ws://127.0.0.1:4002 ls /
//!
//! Set `RUST_LOG=sftpws_proto=debug` to see every dispatched request.

use sftpws_proto::sftp::{LocalFilesystem, SftpServer, SftpServerConfig};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let read_only = args.iter().any(|a| a == "--read-only");
    let positional: Vec<&String> = args.iter().skip(1).filter(|a| !a.starts_with("--")).collect();

    let bind_addr = positional
        .first()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "127.0.0.1:4002".to_string());
    let root = match positional.get(1) {
        Some(root) => std::fs::canonicalize(root)?,
        None => env::current_dir()?,
    };

    println!("=== SFTP over WebSocket Server Example ===");
    println!();

    let config = SftpServerConfig::new()
        .with_virtual_root(root.to_string_lossy())
        .with_read_only(read_only);

    println!("Server configuration:");
    println!("  Root: {}", config.virtual_root);
    println!("  Read-only: {}", config.read_only);
    println!("  Max read length: {} bytes", config.max_read_length);
    println!();

    let fs = LocalFilesystem::new();
    let server = SftpServer::bind(&bind_addr, config, fs).await?;

    println!("✓ Server listening on ws://{}", server.local_addr()?);
    println!("Waiting for connections... (Press Ctrl+C to stop)");
    println!();

    loop {
        match server.accept().await {
            Ok(session) => {
                tokio::spawn(async move {
                    match session.run().await {
                        Ok(()) => println!("Session finished"),
                        Err(e) => println!("Session error: {}", e),
                    }
                });
            }
            Err(e) => {
                eprintln!("Error accepting connection: {}", e);
            }
        }
    }
}
