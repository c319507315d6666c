//! `carta-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use carta_api::config::Config;
use carta_api::server::Server;
use carta_core::observability::{LogFormat, init_logging};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    init_logging(choose_log_format(&config));

    // The document-store engine is an external collaborator; this build
    // ships the in-memory store, which is only suitable for development.
    if !config.debug {
        anyhow::bail!(
            "CARTA_DEBUG=false requires an external document-store backend; \
             this build only provides the in-memory store"
        );
    }
    tracing::warn!("using in-memory document store (debug only; data is not persisted)");

    let server = Server::new(config);
    server.serve().await?;
    Ok(())
}
