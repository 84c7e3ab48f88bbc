//! Supervisor reconnection with capped exponential backoff

use std::time::{Duration, Instant};
use tokio::net::TcpListener;
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

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_then_connects_when_the_server_appears() {
    let port = free_port().await;

    let options = ClientOptions::new(format!("ws://127.0.0.1:{}/", port))
        .reconnect_wait_bounds_ms(10, 200);
    let ws = WebSocket::with_options(options);
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();

    // Connection refused: errors arrive with monotonically increasing
    // retry counts and the backoff pacing attached.
    let first = wait_for(&mut rx, |e| matches!(e, Event::Error(_))).await;
    let second = wait_for(&mut rx, |e| matches!(e, Event::Error(_))).await;
    match (first, second) {
        (Event::Error(a), Event::Error(b)) => {
            assert_eq!(a.retries, 1);
            assert_eq!(b.retries, 2);
            assert_eq!(a.wait_time_ms, 10);
            assert_eq!(b.wait_time_ms, 20);
        }
        _ => unreachable!(),
    }

    // Now the server comes up on the same port.
    let server = WebSocketServer::bind(ServerConfig::new("127.0.0.1", port), EchoHandler)
        .await
        .unwrap();
    let shutdown = server.shutdown_handle();
    tokio::spawn(server.serve());

    wait_for(&mut rx, |e| matches!(e, Event::Open(_))).await;
    assert_eq!(ws.ready_state(), ReadyState::Open);

    ws.stop().await;
    assert_eq!(ws.ready_state(), ReadyState::Closed);
    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_interrupts_a_long_backoff_sleep() {
    let port = free_port().await;

    // A huge initial backoff: after the first failure the supervisor
    // sleeps for minutes unless stop() preempts it.
    let options = ClientOptions::new(format!("ws://127.0.0.1:{}/", port))
        .reconnect_wait_bounds_ms(120_000, 600_000);
    let ws = WebSocket::with_options(options);
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();

    wait_for(&mut rx, |e| matches!(e, Event::Error(_))).await;

    let begun = Instant::now();
    ws.stop().await;
    assert!(
        begun.elapsed() < Duration::from_secs(1),
        "stop took {:?}",
        begun.elapsed()
    );
    assert_eq!(ws.ready_state(), ReadyState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_reconnection_when_disabled() {
    let port = free_port().await;

    let options = ClientOptions::new(format!("ws://127.0.0.1:{}/", port))
        .automatic_reconnection(false);
    let ws = WebSocket::with_options(options);
    let (tx, mut rx) = unbounded_channel();
    ws.on_message(move |event| {
        let _ = tx.send(event);
    });
    ws.start();

    let error = wait_for(&mut rx, |e| matches!(e, Event::Error(_))).await;
    match error {
        Event::Error(info) => {
            // No pacing is reported when reconnection is off
            assert_eq!(info.retries, 0);
            assert_eq!(info.wait_time_ms, 0);
        }
        _ => unreachable!(),
    }

    // The supervisor gives up; a second error would mean it retried.
    let extra = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra event: {:?}", extra);

    ws.stop().await;
}
