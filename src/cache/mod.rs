//! Celestial cache: derived sky state keyed by quantized site and time.
//!
//! The cache is an optimization only. Backends report failures as
//! [`CacheError`]; callers log them and carry on as if the lookup missed.
//! Values are a deterministic function of the key, so concurrent writers may
//! overwrite each other freely (upsert, last writer wins).

use std::future::Future;

use chrono::{DateTime, Duration, TimeZone, Utc};
use thiserror::Error;

use crate::config::Config;
use crate::models::{CelestialSample, Location};

mod memory;
mod postgres;

pub use memory::MemoryCelestialCache;
pub use postgres::PgCelestialCache;

// ---

pub const DEFAULT_BUCKET_MINUTES: i64 = 20;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Quantized lookup key.
///
/// Latitude is rounded to the nearest degree, longitude to the nearest half
/// degree, and time floored to the start of its bucket (counted from the Unix
/// epoch). The model tag keeps estimates from different Milky-Way parameter
/// sets apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    // ---
    pub lat_deg: i32,
    pub lon_half_deg: i32,
    pub bucket_start: DateTime<Utc>,
    pub model_tag: String,
}

impl CacheKey {
    // ---
    pub fn derive(
        location: &Location,
        time: DateTime<Utc>,
        bucket: Duration,
        model_tag: &str,
    ) -> Self {
        // ---
        CacheKey {
            lat_deg: location.latitude.round() as i32,
            lon_half_deg: (location.longitude * 2.0).round() as i32,
            bucket_start: bucket_start(time, bucket),
            model_tag: model_tag.to_string(),
        }
    }

    pub fn latitude(&self) -> f64 {
        f64::from(self.lat_deg)
    }

    pub fn longitude(&self) -> f64 {
        f64::from(self.lon_half_deg) / 2.0
    }
}

/// Floor `time` to the start of its fixed-width bucket.
///
/// Non-positive widths fall back to [`DEFAULT_BUCKET_MINUTES`].
pub fn bucket_start(time: DateTime<Utc>, bucket: Duration) -> DateTime<Utc> {
    // ---
    let width = match bucket.num_seconds() {
        secs if secs > 0 => secs,
        _ => DEFAULT_BUCKET_MINUTES * 60,
    };
    let floored = time.timestamp().div_euclid(width) * width;
    Utc.timestamp_opt(floored, 0).single().unwrap_or(time)
}

/// Key-value store for [`CelestialSample`]s, shared across concurrent runs.
pub trait CelestialCache: Send + Sync {
    // ---
    fn get(
        &self,
        key: &CacheKey,
    ) -> impl Future<Output = Result<Option<CelestialSample>, CacheError>> + Send;

    /// Insert or overwrite the value stored under `key`.
    fn put(
        &self,
        key: &CacheKey,
        sample: &CelestialSample,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Backend selected at startup.
#[derive(Debug, Clone)]
pub enum CacheBackend {
    Postgres(PgCelestialCache),
    Memory(MemoryCelestialCache),
    Disabled,
}

impl CacheBackend {
    // ---
    /// Build the configured backend, falling back to `Disabled` on any
    /// connection or schema failure.
    pub async fn from_config(cfg: &Config) -> Self {
        // ---
        if !cfg.cache_enabled {
            tracing::info!("Celestial cache disabled by configuration");
            return CacheBackend::Disabled;
        }

        let Some(db_url) = cfg.db_url.as_deref() else {
            tracing::warn!("DATABASE_URL not set, celestial cache disabled");
            return CacheBackend::Disabled;
        };

        match PgCelestialCache::connect(db_url, cfg.db_pool_max).await {
            Ok(cache) => {
                tracing::info!("Celestial cache connected");
                CacheBackend::Postgres(cache)
            }
            Err(e) => {
                tracing::warn!("Celestial cache unavailable, continuing without it: {}", e);
                CacheBackend::Disabled
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheBackend::Postgres(_) => "postgres",
            CacheBackend::Memory(_) => "memory",
            CacheBackend::Disabled => "disabled",
        }
    }
}

impl CelestialCache for CacheBackend {
    // ---
    async fn get(&self, key: &CacheKey) -> Result<Option<CelestialSample>, CacheError> {
        match self {
            CacheBackend::Postgres(cache) => cache.get(key).await,
            CacheBackend::Memory(cache) => cache.get(key).await,
            CacheBackend::Disabled => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, sample: &CelestialSample) -> Result<(), CacheError> {
        match self {
            CacheBackend::Postgres(cache) => cache.put(key, sample).await,
            CacheBackend::Memory(cache) => cache.put(key, sample).await,
            CacheBackend::Disabled => Ok(()),
        }
    }
}
