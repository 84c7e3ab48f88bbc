//! Reassembly of a large fragmented binary message

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use wavesocket::handshake::{server_handshake, ServerHandshakeOptions};
use wavesocket::prelude::*;
use wavesocket_transport_tcp::TcpStream;

const CHUNK: usize = 100 * 1024;

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

/// A server that handshakes, then pushes one 300 KiB binary message as
/// three continuation frames (fin = 0, 0, 1).
async fn start_fragmenting_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut stream = TcpStream::from_tokio(tcp);
        let options = ServerHandshakeOptions {
            enable_deflate: false,
            sub_protocols: &[],
            server_header: "fragmenting-test-server",
        };
        server_handshake(&mut stream, &options, &CancelToken::new())
            .await
            .unwrap();

        let frames = [
            Frame::binary(vec![0xA1; CHUNK]).with_fin(false),
            Frame::continuation(vec![0xB2; CHUNK]).with_fin(false),
            Frame::continuation(vec![0xC3; CHUNK]),
        ];
        for frame in &frames {
            stream.write_all(&frame.to_bytes()).await.unwrap();
        }
        stream.flush().await.unwrap();

        // Keep the connection up until the client is done with it
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
async fn three_fragments_arrive_as_one_message() {
    let addr = start_fragmenting_server().await;

    // The raw server never answers the close handshake; keep the close
    // timeout short so stop() returns promptly.
    let options = ClientOptions::new(format!("ws://{}/", addr))
        .automatic_reconnection(false)
        .timeouts(Timeouts::default().close_timeout_secs(1));
    let ws = WebSocket::with_options(options);
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();
    wait_for(&mut rx, |e| matches!(e, Event::Open(_))).await;

    // The two non-final frames surface as fragment markers first
    let mut fragments = 0;
    let message = loop {
        match wait_for(&mut rx, |e| {
            matches!(e, Event::Fragment { .. } | Event::Message { .. })
        })
        .await
        {
            Event::Fragment { wire_size } => {
                assert!(wire_size >= CHUNK);
                fragments += 1;
            }
            Event::Message { data, binary, wire_size } => break (data, binary, wire_size),
            _ => unreachable!(),
        }
    };
    assert_eq!(fragments, 2);

    let (data, binary, wire_size) = message;
    assert!(binary);
    assert_eq!(data.len(), 3 * CHUNK);
    assert!(data[..CHUNK].iter().all(|&b| b == 0xA1));
    assert!(data[CHUNK..2 * CHUNK].iter().all(|&b| b == 0xB2));
    assert!(data[2 * CHUNK..].iter().all(|&b| b == 0xC3));
    // Wire size counts headers of all three frames
    assert!(wire_size > 3 * CHUNK);

    ws.stop().await;
}
