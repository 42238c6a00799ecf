//! Warm the celestial cache for one site over a date range.
//!
//! ```text
//! sqm-prepopulate --lat 56.04 --lon 10.87 --year 2025
//! sqm-prepopulate --lat 56.04 --lon 10.87 --year 2025 --month 12
//! sqm-prepopulate --lat 56.04 --lon 10.87 --start 2025-03-01 --end 2025-03-31 --json
//! ```
//!
//! Reads the same environment as the server; `DATABASE_URL` is required.
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dotenvy::dotenv;

use sqm_darksky::prepopulate::{prepopulate, DateRange};
use sqm_darksky::{Location, LowPrecisionEphemeris, PgCelestialCache};

#[derive(Debug, Parser)]
#[command(name = "sqm-prepopulate", version, about = "Prepopulate the celestial cache")]
struct Args {
    /// Site latitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,

    /// Site longitude in decimal degrees.
    #[arg(long, allow_negative_numbers = true)]
    lon: f64,

    /// Whole year to prepopulate.
    #[arg(long)]
    year: Option<i32>,

    /// Month within --year (1-12).
    #[arg(long, requires = "year")]
    month: Option<u32>,

    /// First day, YYYY-MM-DD.
    #[arg(long, conflicts_with = "year", requires = "end")]
    start: Option<String>,

    /// Last day (inclusive), YYYY-MM-DD.
    #[arg(long, conflicts_with = "year", requires = "start")]
    end: Option<String>,

    /// Print the final report as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // ---
    let args = Args::parse();
    dotenv().ok();
    sqm_darksky::logging::init_tracing("info");

    let cfg = sqm_darksky::config::load_from_env()?;
    let location = Location::new(args.lat, args.lon).map_err(|e| anyhow!("Invalid site: {}", e))?;
    let range = DateRange::resolve(args.year, args.month, args.start.as_deref(), args.end.as_deref())?;

    let db_url = cfg
        .db_url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL must be set to prepopulate the cache"))?;
    tracing::info!(
        "Connecting to database: {}",
        sqm_darksky::config::mask_db_url(db_url)
    );
    let cache = PgCelestialCache::connect(db_url, cfg.db_pool_max)
        .await
        .context("Failed to connect to the celestial cache")?;

    let report = prepopulate(
        &cache,
        &LowPrecisionEphemeris,
        &cfg.model,
        &location,
        range,
        cfg.cache_bucket(),
    )
    .await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Processed {} buckets: {} stored, {} daytime, {} errors",
            report.total_buckets, report.stored, report.daytime, report.errors
        );
    }

    Ok(if report.errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
