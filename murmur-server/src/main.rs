use std::sync::Arc;

use murmur_server::{handle_connection, MessageStore, RelayState, SqliteStore};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:9010";
const DEFAULT_DB_PATH: &str = "murmur.db";

#[tokio::main]
async fn main() {
    // Load .env if present, then initialize logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("MURMUR_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let db_path = std::env::var("MURMUR_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    let store: Arc<dyn MessageStore> = match SqliteStore::open(&db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open message store at {}: {}", db_path, e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(RelayState::with_store(store));

    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Murmur relay listening on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                info!("New connection from {}", peer_addr);

                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => {
                            handle_connection(ws_stream, state).await;
                        }
                        Err(e) => {
                            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
                        }
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
