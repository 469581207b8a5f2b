//! custos server entry point.
//!
//! Configuration comes from the environment: `REDIS_STORAGE_PATH`,
//! `REDIS_DATA_DIR`, `REDIS_SAVE_INTERVAL`, `REDIS_PASSWORD`, plus
//! `CUSTOS_PORT`/`CUSTOS_BIND` for the listen address.

use custos::{Config, Server};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> custos::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::from_env();
    if let Ok(port) = std::env::var("CUSTOS_PORT") {
        if let Ok(port) = port.parse() {
            config = config.port(port);
        }
    }
    if let Ok(bind) = std::env::var("CUSTOS_BIND") {
        config = config.bind(bind);
    }

    info!(
        version = custos::VERSION,
        port = config.port,
        appendonly = config.appendonly,
        "starting custos"
    );

    let server = Arc::new(Server::new(config));
    server.run().await
}
