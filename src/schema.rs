//! Database schema management for the celestial cache.
//!
//! Ensures the cache table exists before it is queried. Applied once when
//! the PostgreSQL backend connects.

use sqlx::PgPool;

// ---

/// Create the cache schema (idempotent).
///
/// Quantized latitude/longitude are exact binary fractions and compare
/// exactly as `DOUBLE PRECISION` primary-key columns.
pub async fn create_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS celestial_cache (
            lat               DOUBLE PRECISION NOT NULL,
            lon               DOUBLE PRECISION NOT NULL,
            time_bucket       TIMESTAMPTZ      NOT NULL,
            model_tag         TEXT             NOT NULL,
            sun_alt           DOUBLE PRECISION NOT NULL,
            moon_alt          DOUBLE PRECISION NOT NULL,
            mw_brightness     DOUBLE PRECISION NOT NULL,
            milky_way_visible BOOLEAN          NOT NULL,
            created_at        TIMESTAMPTZ      NOT NULL DEFAULT now(),
            PRIMARY KEY (lat, lon, time_bucket, model_tag)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_celestial_cache_time_bucket
            ON celestial_cache (time_bucket);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
