//! Logging for the portal server.
//!
//! The server uses the `tracing` library for logging. After calling [`setup`],
//! messages from [`tracing::info!`], [`tracing::warn!`] and friends are
//! printed to `stdout`, as are the request spans from the HTTP trace layer.
//!
//! Set the `RUST_LOG` environment variable to override the configured level
//! (see [`EnvFilter`][`tracing_subscriber::EnvFilter`]), e.g.
//! `RUST_LOG=portal_server=debug,voting_core=debug,tower_http=debug`.

use tracing_subscriber::{prelude::*, util::SubscriberInitExt};

use crate::config::Config;

/// Sets up error reporting and logging. Call this once, early in `main`.
pub fn setup(config: &Config) -> color_eyre::Result<()> {
    color_eyre::install()?;
    let stdout_log = tracing_subscriber::fmt::layer().pretty();
    let level = config.log_level;
    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().or_else(|_| {
        tracing_subscriber::EnvFilter::try_new(format!(
            "{crate_name}={level},voting_core={level},genai_client={level},tower_http={level}"
        ))
    })?;
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_log)
        .init();
    Ok(())
}
