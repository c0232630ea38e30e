//! Simple SFTP-over-WebSocket Client Example
//!
//! This example demonstrates how to:
//! - Connect to a server and complete the SFTP handshake
//! - List directories
//! - Download and upload files with progress reporting
//!
//! Usage:
//!   cargo run --example simple_client <ws-url> <command> [args...]
//!
//! Commands:
//!   ls <path>
//!   get <remote> <local>
//!   put <local> <remote>
//!   mkdir <path>
//!   rm <path>
//!
//! Example:
//!   cargo run --example simple_client ws://127.0.0.1:4002 ls /

use sftpws_proto::sftp::{SftpClient, SftpClientConfig, TransferProgress};
use std::env;
use tracing_subscriber::EnvFilter;

fn print_progress(p: TransferProgress) {
    match p.fraction() {
        Some(fraction) => println!("  {} bytes ({:.0}%)", p.transferred, fraction * 100.0),
        None => println!("  {} bytes", p.transferred),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <ws-url> <command> [args...]", args[0]);
        eprintln!("Example: {} ws://127.0.0.1:4002 ls /", args[0]);
        std::process::exit(1);
    }

    let url = &args[1];
    println!("Connecting to {}...", url);
    let client = SftpClient::connect_ws(url, SftpClientConfig::default()).await?;
    println!("✓ Connected (SFTP v3)");
    println!();

    match (args[2].as_str(), &args[3..]) {
        ("ls", [path]) => {
            for entry in client.list(path).await? {
                println!("{}", entry.longname);
            }
        }
        ("get", [remote, local]) => {
            let mut file = tokio::fs::File::create(local).await?;
            let n = client.download(remote, &mut file, print_progress).await?;
            println!("✓ Downloaded {} bytes to {}", n, local);
        }
        ("put", [local, remote]) => {
            let mut file = tokio::fs::File::open(local).await?;
            let total = file.metadata().await?.len();
            let n = client
                .upload(&mut file, remote, Some(total), false, print_progress)
                .await?;
            println!("✓ Uploaded {} bytes to {}", n, remote);
        }
        ("mkdir", [path]) => {
            client.mkdir(path, None).await?;
            println!("✓ Created {}", path);
        }
        ("rm", [path]) => {
            client.unlink(path).await?;
            println!("✓ Removed {}", path);
        }
        (command, _) => {
            eprintln!("Unknown command or wrong arguments: {}", command);
        }
    }

    client.disconnect().await?;
    Ok(())
}
