//! Minimal client: connects, sends a line, prints whatever comes back.
//! `cargo run --example echo_client -- ws://127.0.0.1:9001/`

use std::time::Duration;
use wavesocket::prelude::*;

#[tokio::main]
async fn main() {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001/".to_string());

    let ws = WebSocket::with_options(ClientOptions::new(url));
    ws.on_message(|event| match event {
        Event::Open(info) => println!("open: uri={} protocol={}", info.uri, info.protocol),
        Event::Message { data, binary, .. } => {
            if binary {
                println!("binary message, {} bytes", data.len());
            } else {
                println!("text message: {}", String::from_utf8_lossy(&data));
            }
        }
        Event::Close(info) => println!("closed: {} {}", info.code, info.reason),
        Event::Error(info) => println!(
            "error: {} (retry #{}, next attempt in {} ms)",
            info.reason, info.retries, info.wait_time_ms
        ),
        _ => {}
    });

    ws.start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    ws.send_text("hello from wavesocket");
    tokio::time::sleep(Duration::from_secs(1)).await;
    ws.stop().await;
}
