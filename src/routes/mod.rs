use axum::extract::DefaultBodyLimit;
use axum::Router;

use crate::{CacheBackend, Config};

mod health;
mod process;

// ---

/// Shared state handed to every route.
pub type AppState = (CacheBackend, Config);

pub fn router(cache: CacheBackend, config: Config) -> Router {
    // ---
    let body_limit = config.max_upload_mb.saturating_mul(1024 * 1024);

    Router::new()
        .merge(process::router())
        .merge(health::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state((cache, config))
}
