//! Dark-sky filtering for SQM sky-brightness logs.
//!
//! The crate turns a historical SQM data file into the subset of readings
//! taken under a dark, stable sky, annotated with sun and moon altitude and a
//! Milky-Way visibility estimate. Module layout follows the data flow:
//!
//! - `header` – site and device identity from the file header
//! - `window` – adaptive rolling standard deviation
//! - `ephemeris`, `sky_brightness` – the astronomical leaves
//! - `cache` – celestial cache keyed by quantized site and time
//! - `processor` – the per-stream state machine tying it together
//! - `prepopulate` – cache warm-up for a site and date range

pub mod cache;
pub mod config;
pub mod ephemeris;
pub mod header;
pub mod logging;
pub mod models;
pub mod prepopulate;
pub mod processor;
pub mod quota;
pub mod schema;
pub mod sky_brightness;
pub mod window;

pub use cache::{CacheBackend, CacheKey, CelestialCache, MemoryCelestialCache, PgCelestialCache};
pub use config::Config;
pub use ephemeris::{Ephemeris, LowPrecisionEphemeris};
pub use models::{
    CelestialSample, Location, LocationSource, ProcessParams, Record, Site, StreamSummary,
};
pub use processor::{process_file, ProcessError, StreamProcessor};
pub use quota::{DeviceAllowList, OutputQuota};
pub use sky_brightness::MilkyWayModel;
