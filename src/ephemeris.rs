//! Solar and lunar altitudes plus the galactic latitude of the zenith.
//!
//! Positions come from the abbreviated series of the Astronomical Almanac,
//! good to about 0.01° for the Sun and 0.3° for the Moon within a century of
//! J2000. The zenith is referred to the J2000 galactic pole without
//! precessing the site's sidereal frame, which costs a few tenths of a degree
//! in `b` and is far below what the brightness model resolves.

use chrono::{DateTime, Utc};

use crate::models::Location;

// ---

const J2000_JD: f64 = 2_451_545.0;
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const MILLIS_PER_DAY: f64 = 86_400_000.0;
const DAYS_PER_CENTURY: f64 = 36_525.0;

const GALACTIC_POLE_RA_DEG: f64 = 192.859_48;
const GALACTIC_POLE_DEC_DEG: f64 = 27.128_25;

/// Source of the astronomical quantities the filter depends on.
///
/// Implementations must be pure functions of `(time, location)`.
pub trait Ephemeris {
    // ---
    /// Altitude of the Sun's centre above the horizon, degrees.
    fn sun_altitude(&self, time: DateTime<Utc>, location: &Location) -> f64;

    /// Topocentric altitude of the Moon's centre above the horizon, degrees.
    fn moon_altitude(&self, time: DateTime<Utc>, location: &Location) -> f64;

    /// Galactic latitude of the local zenith, degrees in `[-90, 90]`.
    fn zenith_galactic_latitude(&self, time: DateTime<Utc>, location: &Location) -> f64;

    /// `(sun_altitude, moon_altitude)` for the same instant.
    fn altitudes(&self, time: DateTime<Utc>, location: &Location) -> (f64, f64) {
        (
            self.sun_altitude(time, location),
            self.moon_altitude(time, location),
        )
    }
}

/// Closed-form ephemeris; no tables, no I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowPrecisionEphemeris;

impl Ephemeris for LowPrecisionEphemeris {
    // ---
    fn sun_altitude(&self, time: DateTime<Utc>, location: &Location) -> f64 {
        let d = days_since_j2000(time);
        let sun = ecliptic_to_equatorial(sun_ecliptic_longitude(d), 0.0, obliquity(d));
        altitude(&sun, location, local_sidereal_time(d, location.longitude))
    }

    fn moon_altitude(&self, time: DateTime<Utc>, location: &Location) -> f64 {
        let d = days_since_j2000(time);
        let moon = moon_ecliptic(d);
        let equatorial = ecliptic_to_equatorial(moon.longitude, moon.latitude, obliquity(d));
        let geocentric = altitude(
            &equatorial,
            location,
            local_sidereal_time(d, location.longitude),
        );

        // Parallax lowers the Moon by up to ~1° as seen from the surface.
        geocentric - moon.parallax * geocentric.to_radians().cos()
    }

    fn zenith_galactic_latitude(&self, time: DateTime<Utc>, location: &Location) -> f64 {
        let d = days_since_j2000(time);
        let zenith = Equatorial {
            ra: local_sidereal_time(d, location.longitude),
            dec: location.latitude,
        };
        galactic_latitude(&zenith)
    }
}

// ---

/// Right ascension / declination pair, degrees.
#[derive(Debug, Clone, Copy)]
struct Equatorial {
    ra: f64,
    dec: f64,
}

/// Geocentric ecliptic position of the Moon, degrees.
#[derive(Debug, Clone, Copy)]
struct MoonEcliptic {
    longitude: f64,
    latitude: f64,
    /// Horizontal parallax.
    parallax: f64,
}

fn days_since_j2000(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / MILLIS_PER_DAY + UNIX_EPOCH_JD - J2000_JD
}

fn normalize_degrees(angle: f64) -> f64 {
    angle.rem_euclid(360.0)
}

fn obliquity(d: f64) -> f64 {
    23.439 - 0.000_000_4 * d
}

fn greenwich_sidereal_time(d: f64) -> f64 {
    normalize_degrees(280.460_618_37 + 360.985_647_366_29 * d)
}

fn local_sidereal_time(d: f64, longitude: f64) -> f64 {
    normalize_degrees(greenwich_sidereal_time(d) + longitude)
}

fn sun_ecliptic_longitude(d: f64) -> f64 {
    // ---
    let mean_longitude = 280.460 + 0.985_647_4 * d;
    let anomaly = (357.528 + 0.985_600_3 * d).to_radians();
    normalize_degrees(mean_longitude + 1.915 * anomaly.sin() + 0.020 * (2.0 * anomaly).sin())
}

fn moon_ecliptic(d: f64) -> MoonEcliptic {
    // ---
    let t = d / DAYS_PER_CENTURY;
    let s = |phase: f64, rate: f64| (phase + rate * t).to_radians().sin();
    let c = |phase: f64, rate: f64| (phase + rate * t).to_radians().cos();

    let longitude = 218.32 + 481_267.881 * t + 6.29 * s(134.9, 477_198.85)
        - 1.27 * s(259.2, -413_335.38)
        + 0.66 * s(235.7, 890_534.23)
        + 0.21 * s(269.9, 954_397.70)
        - 0.19 * s(357.5, 35_999.05)
        - 0.11 * s(186.6, 966_404.05);

    let latitude = 5.13 * s(93.3, 483_202.03) + 0.28 * s(228.2, 960_400.87)
        - 0.28 * s(318.3, 6_003.18)
        - 0.17 * s(217.6, -407_332.20);

    let parallax = 0.9508
        + 0.0518 * c(134.9, 477_198.85)
        + 0.0095 * c(259.2, -413_335.38)
        + 0.0078 * c(235.7, 890_534.23)
        + 0.0028 * c(269.9, 954_397.70);

    MoonEcliptic {
        longitude: normalize_degrees(longitude),
        latitude,
        parallax,
    }
}

fn ecliptic_to_equatorial(longitude: f64, latitude: f64, obliquity: f64) -> Equatorial {
    // ---
    let (lambda, beta, eps) = (
        longitude.to_radians(),
        latitude.to_radians(),
        obliquity.to_radians(),
    );
    let ra = (lambda.sin() * eps.cos() - beta.tan() * eps.sin()).atan2(lambda.cos());
    let dec = (beta.sin() * eps.cos() + beta.cos() * eps.sin() * lambda.sin()).asin();

    Equatorial {
        ra: normalize_degrees(ra.to_degrees()),
        dec: dec.to_degrees(),
    }
}

fn altitude(body: &Equatorial, location: &Location, lst: f64) -> f64 {
    // ---
    let hour_angle = (lst - body.ra).to_radians();
    let (phi, dec) = (location.latitude.to_radians(), body.dec.to_radians());
    let sin_alt = phi.sin() * dec.sin() + phi.cos() * dec.cos() * hour_angle.cos();
    sin_alt.clamp(-1.0, 1.0).asin().to_degrees()
}

fn galactic_latitude(position: &Equatorial) -> f64 {
    // ---
    let (ra, dec) = (position.ra.to_radians(), position.dec.to_radians());
    let (pole_ra, pole_dec) = (
        GALACTIC_POLE_RA_DEG.to_radians(),
        GALACTIC_POLE_DEC_DEG.to_radians(),
    );
    let sin_b = dec.sin() * pole_dec.sin() + dec.cos() * pole_dec.cos() * (ra - pole_ra).cos();
    sin_b.clamp(-1.0, 1.0).asin().to_degrees()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, TimeZone};

    fn site() -> Location {
        Location::new(56.04, 10.87).unwrap()
    }

    /// Signed difference `a - b` folded into `(-180, 180]`.
    fn angle_between(a: f64, b: f64) -> f64 {
        let diff = normalize_degrees(a - b);
        if diff > 180.0 {
            diff - 360.0
        } else {
            diff
        }
    }

    #[test]
    fn test_j2000_epoch() {
        // ---
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert_abs_diff_eq!(days_since_j2000(epoch), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(greenwich_sidereal_time(0.0), 280.460_618_37, epsilon = 1e-9);
    }

    #[test]
    fn test_sun_at_summer_solstice_noon() {
        // ---
        // Local apparent noon at 10.87°E is close to 11:15 UTC.
        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 11, 15, 0).unwrap();
        let alt = LowPrecisionEphemeris.sun_altitude(noon, &site());

        // 90 - latitude + obliquity
        assert_abs_diff_eq!(alt, 90.0 - 56.04 + 23.44, epsilon = 0.3);
    }

    #[test]
    fn test_sun_at_winter_solstice_midnight() {
        // ---
        let midnight = Utc.with_ymd_and_hms(2024, 12, 21, 23, 15, 0).unwrap();
        let alt = LowPrecisionEphemeris.sun_altitude(midnight, &site());

        assert_abs_diff_eq!(alt, -(90.0 - 56.04) - 23.44, epsilon = 0.3);
    }

    #[test]
    fn test_moon_opposes_sun_at_full_moon() {
        // ---
        // Full moon 2024-03-25 07:00 UTC, new moon 2024-04-08 18:21 UTC.
        let full = days_since_j2000(Utc.with_ymd_and_hms(2024, 3, 25, 7, 0, 0).unwrap());
        let elongation = angle_between(moon_ecliptic(full).longitude, sun_ecliptic_longitude(full));
        assert_abs_diff_eq!(elongation.abs(), 180.0, epsilon = 1.5);

        let new = days_since_j2000(Utc.with_ymd_and_hms(2024, 4, 8, 18, 21, 0).unwrap());
        let elongation = angle_between(moon_ecliptic(new).longitude, sun_ecliptic_longitude(new));
        assert_abs_diff_eq!(elongation, 0.0, epsilon = 1.5);
    }

    #[test]
    fn test_moon_rises_and_sets_at_mid_latitude() {
        // ---
        let start = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let altitudes: Vec<f64> = (0..26)
            .map(|h| LowPrecisionEphemeris.moon_altitude(start + Duration::hours(h), &site()))
            .collect();

        assert!(altitudes.iter().all(|a| (-90.0..=90.0).contains(a)));
        assert!(altitudes.iter().any(|a| *a > 0.0));
        assert!(altitudes.iter().any(|a| *a < 0.0));
    }

    #[test]
    fn test_galactic_latitude_reference_points() {
        // ---
        let north_pole = Equatorial {
            ra: GALACTIC_POLE_RA_DEG,
            dec: GALACTIC_POLE_DEC_DEG,
        };
        assert_abs_diff_eq!(galactic_latitude(&north_pole), 90.0, epsilon = 1e-6);

        let centre = Equatorial {
            ra: 266.405,
            dec: -28.936,
        };
        assert_abs_diff_eq!(galactic_latitude(&centre), 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_zenith_galactic_latitude_in_range() {
        // ---
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        for h in 0..24 {
            let b = LowPrecisionEphemeris
                .zenith_galactic_latitude(start + Duration::hours(h), &site());
            assert!((-90.0..=90.0).contains(&b));
        }
    }

    #[test]
    fn test_altitudes_matches_individual_calls() {
        // ---
        let time = Utc.with_ymd_and_hms(2024, 12, 30, 22, 0, 0).unwrap();
        let (sun, moon) = LowPrecisionEphemeris.altitudes(time, &site());

        assert_eq!(sun, LowPrecisionEphemeris.sun_altitude(time, &site()));
        assert_eq!(moon, LowPrecisionEphemeris.moon_altitude(time, &site()));
    }
}
