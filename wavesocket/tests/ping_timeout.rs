//! Heartbeat enforcement: a peer that swallows pings gets closed with 1011

use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use wavesocket::handshake::{server_handshake, ServerHandshakeOptions};
use wavesocket::prelude::*;
use wavesocket_transport_tcp::TcpStream;

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

/// Handshakes, then reads and discards everything without ever writing:
/// pings go unanswered.
async fn start_mute_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut stream = TcpStream::from_tokio(tcp);
        let options = ServerHandshakeOptions {
            enable_deflate: false,
            sub_protocols: &[],
            server_header: "mute-test-server",
        };
        if server_handshake(&mut stream, &options, &CancelToken::new())
            .await
            .is_err()
        {
            return;
        }
        let mut buf = [0u8; 1024];
        while let Ok(n) = stream.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    });

    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_pings_close_with_1011() {
    let addr = start_mute_server().await;

    let options = ClientOptions::new(format!("ws://{}/", addr))
        .automatic_reconnection(false)
        .timeouts(
            Timeouts::default()
                .ping_interval_secs(1)
                .ping_timeout_secs(2),
        );
    let ws = WebSocket::with_options(options);
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });

    let started = Instant::now();
    ws.start();
    wait_for(&mut rx, |e| matches!(e, Event::Open(_))).await;

    let close = wait_for(&mut rx, |e| matches!(e, Event::Close(_))).await;
    match close {
        Event::Close(info) => assert_eq!(info.code, 1011),
        _ => unreachable!(),
    }

    let error = wait_for(&mut rx, |e| matches!(e, Event::Error(_))).await;
    match error {
        Event::Error(info) => {
            assert!(
                info.reason.contains("ping timeout"),
                "unexpected reason: {}",
                info.reason
            );
        }
        _ => unreachable!(),
    }

    // The heartbeat goes out on open, so the deadline is roughly the
    // configured two seconds; allow slack for CI schedulers.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1500), "closed too early: {:?}", elapsed);
    assert!(elapsed <= Duration::from_secs(8), "closed too late: {:?}", elapsed);

    assert!(ws.stats().pings_sent >= 1);
    ws.stop().await;
}
