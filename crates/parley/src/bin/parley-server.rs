//! Parley chat server.
//!
//! Reads an optional TOML config from `PARLEY_CONFIG`, then serves
//! WebSocket clients until Ctrl-C. `RUST_LOG` controls log output.

use parley::logging::init_tracing;
use parley::{ParleyError, ParleyServerBuilder, ServerConfig};

const CONFIG_ENV: &str = "PARLEY_CONFIG";

#[tokio::main]
async fn main() -> Result<(), ParleyError> {
    init_tracing("info");

    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => ServerConfig::load(path)?,
        None => {
            tracing::info!("{CONFIG_ENV} not set, using defaults");
            ServerConfig::default()
        }
    }
    .with_env_overrides();

    let server = ParleyServerBuilder::from_config(&config).build().await?;
    match server.local_addr() {
        Ok(addr) => tracing::info!(%addr, "parley listening"),
        Err(e) => tracing::warn!(error = %e, "could not read local address"),
    }
    server.run().await
}
