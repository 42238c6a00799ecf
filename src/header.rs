//! Header block of SQM data files.
//!
//! Files open with `#` comment lines. Only three entries matter here:
//!
//! ```text
//! # Position (lat, lon, elev(m)): 56.04, 10.87, 12
//! # Location name: Møns Klint
//! # SQM serial number: 2586
//! ```

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt};

use crate::models::{Location, LocationSource, Site};

// ---

const POSITION_KEY: &str = "Position (lat, lon, elev(m)):";
const LOCATION_NAME_KEY: &str = "Location name:";
const SERIAL_KEY: &str = "SQM serial number:";

pub const UNKNOWN_LOCATION_NAME: &str = "Unknown location";

/// Values extracted from a file header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHeader {
    // ---
    pub location: Option<Location>,
    pub location_name: Option<String>,
    pub device_id: Option<String>,
    pub line_count: usize,
}

impl FileHeader {
    // ---
    /// Fold one header line into the collected values.
    pub fn parse_line(&mut self, line: &str) {
        // ---
        self.line_count += 1;
        let body = line.trim_start_matches('#').trim();

        if let Some(rest) = body.strip_prefix(POSITION_KEY) {
            match parse_position(rest) {
                Some(location) => self.location = Some(location),
                None => tracing::warn!("Ignoring invalid header position: {}", rest.trim()),
            }
        } else if let Some(rest) = body.strip_prefix(LOCATION_NAME_KEY) {
            self.location_name = non_empty(rest);
        } else if let Some(rest) = body.strip_prefix(SERIAL_KEY) {
            self.device_id = non_empty(rest);
            tracing::debug!("Found serial from header: {:?}", self.device_id);
        }
    }

    /// Resolve the site, substituting `default` when no position was found.
    pub fn resolve(&self, default: Location) -> Site {
        // ---
        let (location, source) = match self.location {
            Some(location) => (location, LocationSource::Header),
            None => {
                tracing::warn!("Could not extract location from header, using default");
                (default, LocationSource::Default)
            }
        };

        Site {
            location,
            source,
            name: self
                .location_name
                .clone()
                .unwrap_or_else(|| UNKNOWN_LOCATION_NAME.to_string()),
            device_id: self.device_id.clone(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_position(rest: &str) -> Option<Location> {
    // ---
    let mut parts = rest.split(',').map(str::trim);
    let latitude = parts.next()?.parse::<f64>().ok()?;
    let longitude = parts.next()?.parse::<f64>().ok()?;
    Location::new(latitude, longitude).ok()
}

/// Consume the leading `#` lines of `reader`, leaving it at the first data line.
pub async fn read_header<R>(reader: &mut R) -> io::Result<FileHeader>
where
    R: AsyncBufRead + Unpin,
{
    // ---
    let mut header = FileHeader::default();
    let mut buf = Vec::new();

    loop {
        let next = reader.fill_buf().await?;
        if next.first() != Some(&b'#') {
            break;
        }

        buf.clear();
        reader.read_until(b'\n', &mut buf).await?;
        header.parse_line(&String::from_utf8_lossy(&buf));
    }

    tracing::debug!("header_len: {}", header.line_count);
    Ok(header)
}
