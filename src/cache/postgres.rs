//! PostgreSQL cache backend.

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use super::{CacheError, CacheKey, CelestialCache};
use crate::models::CelestialSample;
use crate::schema;

// ---

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PgCelestialCache {
    pool: PgPool,
}

impl PgCelestialCache {
    // ---
    pub fn new(pool: PgPool) -> Self {
        PgCelestialCache { pool }
    }

    /// Connect and make sure the cache table exists.
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, CacheError> {
        // ---
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(db_url)
            .await?;

        schema::create_schema(&pool).await?;
        Ok(PgCelestialCache { pool })
    }
}

impl CelestialCache for PgCelestialCache {
    // ---
    async fn get(&self, key: &CacheKey) -> Result<Option<CelestialSample>, CacheError> {
        // ---
        let row = sqlx::query_as::<_, CelestialSample>(
            r#"
            SELECT sun_alt, moon_alt, mw_brightness, milky_way_visible
            FROM celestial_cache
            WHERE lat = $1 AND lon = $2 AND time_bucket = $3 AND model_tag = $4
            "#,
        )
        .bind(key.latitude())
        .bind(key.longitude())
        .bind(key.bucket_start)
        .bind(&key.model_tag)
        .fetch_optional(&self.pool)
        .await?;

        match &row {
            Some(_) => tracing::debug!(
                "Cache HIT: {}, {}, {}",
                key.latitude(),
                key.longitude(),
                key.bucket_start
            ),
            None => tracing::debug!(
                "Cache MISS: {}, {}, {}",
                key.latitude(),
                key.longitude(),
                key.bucket_start
            ),
        }
        Ok(row)
    }

    async fn put(&self, key: &CacheKey, sample: &CelestialSample) -> Result<(), CacheError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO celestial_cache (
                lat, lon, time_bucket, model_tag,
                sun_alt, moon_alt, mw_brightness, milky_way_visible
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (lat, lon, time_bucket, model_tag) DO UPDATE SET
                sun_alt           = EXCLUDED.sun_alt,
                moon_alt          = EXCLUDED.moon_alt,
                mw_brightness     = EXCLUDED.mw_brightness,
                milky_way_visible = EXCLUDED.milky_way_visible
            "#,
        )
        .bind(key.latitude())
        .bind(key.longitude())
        .bind(key.bucket_start)
        .bind(&key.model_tag)
        .bind(sample.sun_alt)
        .bind(sample.moon_alt)
        .bind(sample.mw_brightness)
        .bind(sample.milky_way_visible)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Cache stored: {}, {}, {}",
            key.latitude(),
            key.longitude(),
            key.bucket_start
        );
        Ok(())
    }
}
