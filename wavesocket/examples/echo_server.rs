//! Minimal echo server: `cargo run --example echo_server`

use wavesocket::server::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = ServerConfig::new("127.0.0.1", 9001);
    let server = WebSocketServer::bind(config, EchoHandler).await?;
    println!("echo server on ws://{}", server.local_addr());
    server.serve().await
}
