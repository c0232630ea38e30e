//! Integration tests for the WebSocket transport.
//!
//! A real server is bound to an ephemeral loopback port. Raw
//! `tokio-tungstenite` clients probe the framing rules.

#![cfg(feature = "websocket")]

use futures::{SinkExt, StreamExt};
use sftpws_proto::sftp::codec::Frame;
use sftpws_proto::sftp::{
    LocalFilesystem, MessageType, Request, SftpClient, SftpClientConfig, SftpServer,
    SftpServerConfig,
};
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server(dir: &TempDir) -> SocketAddr {
    let config = SftpServerConfig::new().with_virtual_root(dir.path().to_str().unwrap());
    let server = SftpServer::bind("127.0.0.1:0", config, LocalFilesystem::new())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.serve());
    addr
}

/// Reads until the server's close frame and returns its code.
async fn close_code<S>(ws: &mut S) -> Option<u16>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Close(frame)) => return frame.map(|f| u16::from(f.code)),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

#[tokio::test]
async fn test_client_over_websocket() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let addr = spawn_server(&dir).await;

    let client = timeout(
        Duration::from_secs(5),
        SftpClient::connect_ws(&format!("ws://{}", addr), SftpClientConfig::default()),
    )
    .await??;

    client.mkdir("/up", None).await?;
    client.write_file("/up/a.txt", b"over the wire").await?;
    assert_eq!(&client.read_file("/up/a.txt").await?[..], b"over the wire");

    let entries = client.list("/up").await?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].filename, "a.txt");

    assert_eq!(
        std::fs::read(dir.path().join("up/a.txt"))?,
        b"over the wire"
    );

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_raw_handshake() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let addr = spawn_server(&dir).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await?;

    let init = Request::Init { version: 3 }.encode(0);
    ws.send(Message::Binary(init.to_vec())).await?;

    let reply = timeout(Duration::from_secs(5), ws.next()).await?.unwrap()?;
    let data = match reply {
        Message::Binary(data) => data,
        other => panic!("unexpected message: {:?}", other),
    };
    let mut frame = Frame::parse(&data)?;
    assert_eq!(frame.kind, MessageType::Version as u8);
    assert_eq!(frame.id, None);
    assert_eq!(frame.payload.read_u32()?, 3);
    Ok(())
}

#[tokio::test]
async fn test_text_message_closes_with_unsupported_data() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let addr = spawn_server(&dir).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await?;

    ws.send(Message::Text("hello".to_string())).await?;

    let code = timeout(Duration::from_secs(5), close_code(&mut ws)).await?;
    assert_eq!(code, Some(1003));
    Ok(())
}

#[tokio::test]
async fn test_old_version_closes_with_protocol_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let addr = spawn_server(&dir).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await?;

    let init = Request::Init { version: 2 }.encode(0);
    ws.send(Message::Binary(init.to_vec())).await?;

    let code = timeout(Duration::from_secs(5), close_code(&mut ws)).await?;
    assert_eq!(code, Some(1002));
    Ok(())
}

#[tokio::test]
async fn test_request_before_init_closes_with_protocol_error(
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let addr = spawn_server(&dir).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await?;

    let stat = Request::Stat { path: "/".into() }.encode(1);
    ws.send(Message::Binary(stat.to_vec())).await?;

    let code = timeout(Duration::from_secs(5), close_code(&mut ws)).await?;
    assert_eq!(code, Some(1002));
    Ok(())
}
