//! Tunneling through an HTTP CONNECT proxy

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use wavesocket::prelude::*;

async fn wait_for<F>(rx: &mut UnboundedReceiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

async fn start_echo_server() -> (SocketAddr, ShutdownHandle) {
    let server = WebSocketServer::bind(ServerConfig::new("127.0.0.1", 0), EchoHandler)
        .await
        .unwrap();
    let addr = server.local_addr();
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.serve());
    (addr, shutdown)
}

/// Minimal CONNECT proxy: checks basic auth when required, answers 200
/// and splices the two directions; or rejects everything with 407.
async fn start_mock_proxy(required_auth: Option<&'static str>, accept: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut client, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let Ok(n) = client.read(&mut chunk).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf).into_owned();

                let mut lines = request.lines();
                let connect_line = lines.next().unwrap_or_default().to_string();
                if !accept {
                    let _ = client
                        .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                        .await;
                    return;
                }
                if let Some(auth) = required_auth {
                    let expected = format!("Proxy-Authorization: Basic {}", auth);
                    if !request.contains(&expected) {
                        let _ = client
                            .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                            .await;
                        return;
                    }
                }

                // CONNECT host:port HTTP/1.1
                let target = connect_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let Ok(mut upstream) = TcpStream::connect(&target).await else {
                    let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
                    return;
                };
                if client
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .is_err()
                {
                    return;
                }
                let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
            });
        }
    });

    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_through_authenticated_connect_proxy() {
    let (target, shutdown) = start_echo_server().await;
    // base64("user:pass")
    let proxy_addr = start_mock_proxy(Some("dXNlcjpwYXNz"), true).await;

    let mut options =
        ClientOptions::new(format!("ws://{}/", target)).automatic_reconnection(false);
    options.proxy = ProxyConfig::from_url(&format!("http://user:pass@{}", proxy_addr)).unwrap();

    let ws = WebSocket::with_options(options);
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();

    wait_for(&mut rx, |e| matches!(e, Event::Open(_))).await;
    assert!(ws.send_text("through the tunnel").success);
    let reply = wait_for(&mut rx, |e| matches!(e, Event::Message { .. })).await;
    match reply {
        Event::Message { data, .. } => assert_eq!(&data[..], b"through the tunnel"),
        _ => unreachable!(),
    }

    ws.stop().await;
    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_rejection_surfaces_as_connect_error() {
    let (target, shutdown) = start_echo_server().await;
    let proxy_addr = start_mock_proxy(None, false).await;

    let mut options =
        ClientOptions::new(format!("ws://{}/", target)).automatic_reconnection(false);
    options.proxy = ProxyConfig::from_url(&format!("http://{}", proxy_addr)).unwrap();

    let ws = WebSocket::with_options(options);
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();

    let error = wait_for(&mut rx, |e| matches!(e, Event::Error(_))).await;
    match error {
        Event::Error(info) => {
            assert!(info.reason.contains("407"), "unexpected reason: {}", info.reason);
        }
        _ => unreachable!(),
    }

    ws.stop().await;
    shutdown.shutdown();
}
