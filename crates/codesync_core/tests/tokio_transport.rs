//! WebSocket transport against a local echo server.
#![cfg(feature = "native-sync")]

use std::sync::Arc;
use std::time::Duration;

use codesync_core::{
    CollabSession, ConnectionStatus, EditOp, SyncConfig, TokioTransport, Transport,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Accept one client and echo every text frame back to it.
async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_text() && ws.send(message).await.is_err() {
                break;
            }
        }
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn frames_round_trip_through_socket() {
    let url = spawn_echo_server().await;
    let transport = TokioTransport::connect(&url).await.unwrap();
    assert!(transport.is_connected());

    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.set_on_receive(Arc::new(move |frame: &str| {
        let _ = tx.send(frame.to_string());
    }));

    transport.send("ping-frame").unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, "ping-frame");
}

#[tokio::test]
async fn close_reports_disconnect() {
    let url = spawn_echo_server().await;
    let transport = TokioTransport::connect(&url).await.unwrap();
    transport.set_on_status(Arc::new(|_status: ConnectionStatus| {}));

    transport.close();
    assert!(!transport.is_connected());
    assert!(transport.send("late").is_err());
}

#[tokio::test]
async fn session_ignores_its_own_echo() {
    let url = spawn_echo_server().await;
    let transport = Arc::new(TokioTransport::connect(&url).await.unwrap());
    let session = CollabSession::open(
        SyncConfig::new("room-1")
            .with_sender_id("solo")
            .with_coalesce_window(Duration::ZERO),
        transport,
    )
    .unwrap();

    session.edit(EditOp::insert(0, "hi")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.text(), "hi");
    assert_eq!(session.snapshot().revision, 1);
}

#[test]
fn connect_to_nothing_fails() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(TokioTransport::connect("ws://127.0.0.1:1"));
    assert!(result.is_err());
}
