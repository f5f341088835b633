//! AuraSpace synchronization server binary.
//!
//! Configuration comes from the environment:
//!
//! | Variable          | Default          | Meaning                        |
//! |-------------------|------------------|--------------------------------|
//! | `AURA_BIND_ADDR`  | `0.0.0.0:3001`   | WebSocket listen address       |
//! | `PORT`            | —                | Overrides the port only        |
//! | `AURA_MAX_TOTEMS` | `20`             | Scene capacity before eviction |
//!
//! Logging is controlled through `RUST_LOG` (e.g. `RUST_LOG=aura_collab=debug`).

use std::env;

use aura_collab::server::{ServerConfig, SyncServer};
use log::info;

fn config_from_env() -> ServerConfig {
    let mut config = ServerConfig {
        bind_addr: "0.0.0.0:3001".to_string(),
        ..ServerConfig::default()
    };

    if let Ok(addr) = env::var("AURA_BIND_ADDR") {
        config.bind_addr = addr;
    } else if let Ok(port) = env::var("PORT") {
        match port.parse::<u16>() {
            Ok(port) => config.bind_addr = format!("0.0.0.0:{port}"),
            Err(_) => log::warn!("Ignoring unparseable PORT={port}"),
        }
    }

    if let Ok(max) = env::var("AURA_MAX_TOTEMS") {
        match max.parse::<usize>() {
            Ok(max) if max > 0 => config.max_totems = max,
            _ => log::warn!("Ignoring invalid AURA_MAX_TOTEMS={max}"),
        }
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = config_from_env();
    info!(
        "Starting scene server on {} (max {} totems)",
        config.bind_addr, config.max_totems
    );

    let server = SyncServer::new(config);
    server.run().await
}
