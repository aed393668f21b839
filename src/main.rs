use meshrelay::relay::{DEFAULT_RELAY_PORT, RelayServer};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let bind_addr = std::env::var("MESHRELAY_ADDR")
        .unwrap_or_else(|_| format!("0.0.0.0:{}", DEFAULT_RELAY_PORT));

    println!("   Meshrelay Signaling Server");
    println!("   Binding to {}", bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = RelayServer::new();
    server.run(&bind_addr).await
}
