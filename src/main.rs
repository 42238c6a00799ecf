//! Application entry point for the `sqm-darksky` service.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Connecting the celestial cache (PostgreSQL when configured, otherwise
//!   disabled; a failed connection never prevents startup)
//! - Creating the upload and download directories
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! See [`sqm_darksky::config::load_from_env`] for the full list. Logging is
//! controlled by `RUST_LOG` / `AXUM_LOG_LEVEL` (default: `debug`),
//! `AXUM_SPAN_EVENTS` and `FORCE_COLOR`.
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP): the
//! processing library lives in `sqm_darksky`, route registration in `routes`.
use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;

mod routes;

// These are not used here but they are imported to be used by routes/*.rs, that way
// refactoring is easier since routes/*.rs only know their parent module (main.rs)
pub use sqm_darksky::{
    process_file, CacheBackend, Config, MilkyWayModel, ProcessError, ProcessParams,
    StreamProcessor, StreamSummary,
};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    sqm_darksky::logging::init_tracing("debug");
    dotenv().ok();

    let cfg = sqm_darksky::config::load_from_env()?;
    cfg.log_config();

    let cache = CacheBackend::from_config(&cfg).await;
    tracing::info!("Celestial cache backend: {}", cache.kind());

    for dir in [&cfg.upload_dir, &cfg.download_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    let addr = cfg.bind_addr;

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(cache, cfg);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
