//! Standalone sync server.
//!
//! Environment:
//! - `SYNCSTORE_FILE`  backing file (default `database.json`, `.rdb` for binary)
//! - `SYNCSTORE_PORT`  listen port on all interfaces (default 8080)
//! - `SYNCSTORE_TOKEN` shared secret (generated and logged when unset)
//! - `RUST_LOG`        log filter, as for `env_logger`

use log::info;
use syncstore::{ServerConfig, SyncServer};

const DEFAULT_PORT: u16 = 8080;

fn config_from_env() -> ServerConfig {
    let file = std::env::var("SYNCSTORE_FILE").unwrap_or_else(|_| "database.json".to_string());
    let port = match std::env::var("SYNCSTORE_PORT") {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            log::warn!("Invalid SYNCSTORE_PORT {raw:?} ({e}), using {DEFAULT_PORT}");
            DEFAULT_PORT
        }),
        Err(_) => DEFAULT_PORT,
    };

    let mut config = ServerConfig::new(file).with_port(port);
    if let Ok(token) = std::env::var("SYNCSTORE_TOKEN") {
        config = config.with_auth_token(token);
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::var_os("RUST_LOG").is_none() {
        env_logger::Builder::new().filter_level(log::LevelFilter::Info).init();
    } else {
        env_logger::init();
    }

    info!("Starting syncstore server...");

    let config = config_from_env();
    let generated = config.auth_token.is_none();
    let server = SyncServer::new(config);
    if generated {
        info!("Generated auth token: {}", server.auth_token());
    } else {
        info!("Using auth token from SYNCSTORE_TOKEN");
    }

    server.run().await
}
