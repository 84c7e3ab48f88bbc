//! Per-message deflate end to end: negotiation, wire savings, takeover

use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use wavesocket::prelude::*;

async fn wait_for<F>(rx: &mut UnboundedReceiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

async fn start_echo_server(enable_deflate: bool) -> (SocketAddr, ShutdownHandle) {
    let config = ServerConfig::new("127.0.0.1", 0).per_message_deflate(enable_deflate);
    let server = WebSocketServer::bind(config, EchoHandler).await.unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.serve());
    (addr, shutdown)
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_messages_compress_on_the_wire() {
    let (addr, shutdown) = start_echo_server(true).await;

    let ws = WebSocket::with_options(ClientOptions::new(format!("ws://{}/", addr)));
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();
    wait_for(&mut rx, |e| matches!(e, Event::Open(_))).await;

    // 64 KiB of compressible text, sent ten times
    let payload = {
        let filler = "status update; nothing changed since the last one. ".repeat(2000);
        filler[..64 * 1024].to_string()
    };
    assert_eq!(payload.len(), 64 * 1024);

    let mut wire_sizes = Vec::new();
    for _ in 0..10 {
        let info = ws.send_text(&payload);
        assert!(info.success);
        assert!(!info.compression_error);
        // Compression must beat the raw payload by a wide margin
        assert!(info.wire_size < payload.len() / 2);
        wire_sizes.push(info.wire_size);
    }

    // With context takeover the total stays within 10 x first x 1.1
    let first = wire_sizes[0];
    let total: usize = wire_sizes.iter().sum();
    assert!(
        total * 10 <= first * 10 * 11,
        "total {} exceeds 1.1x bound over first {}",
        total,
        first
    );

    // Every echo inflates back to the exact payload
    for _ in 0..10 {
        let reply = wait_for(&mut rx, |e| matches!(e, Event::Message { .. })).await;
        match reply {
            Event::Message { data, binary, wire_size } => {
                assert!(!binary);
                assert_eq!(data.len(), payload.len());
                assert_eq!(&data[..], payload.as_bytes());
                // The reported wire size is pre-inflate
                assert!(wire_size < payload.len());
            }
            _ => unreachable!(),
        }
    }

    let stats = ws.stats();
    assert_eq!(stats.messages_sent, 10);
    assert_eq!(stats.messages_received, 10);
    // Wire-level byte counters reflect the compressed sizes
    assert!(stats.bytes_sent < (10 * payload.len() as u64) / 2);

    ws.stop().await;
    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn deflate_disabled_server_falls_back_to_identity() {
    let (addr, shutdown) = start_echo_server(false).await;

    let ws = WebSocket::with_options(ClientOptions::new(format!("ws://{}/", addr)));
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();
    wait_for(&mut rx, |e| matches!(e, Event::Open(_))).await;

    let payload = "x".repeat(4096);
    let info = ws.send_text(&payload);
    assert!(info.success);
    // No negotiation, no compression: wire size covers the raw payload
    assert!(info.wire_size >= payload.len());

    let reply = wait_for(&mut rx, |e| matches!(e, Event::Message { .. })).await;
    match reply {
        Event::Message { data, .. } => assert_eq!(data.len(), payload.len()),
        _ => unreachable!(),
    }

    ws.stop().await;
    shutdown.shutdown();
}
