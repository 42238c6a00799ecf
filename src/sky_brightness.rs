//! Milky-Way surface-brightness model.
//!
//! Brightness at the galactic plane is a site-tuned baseline that fades
//! linearly with `|b|` toward the poles; extinction adds a term proportional
//! to `airmass - 1`. Smaller mag/arcsec² means a more prominent Milky Way.

use serde::{Deserialize, Serialize};

// ---

/// Parameters of the linear galactic-latitude model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MilkyWayModel {
    // ---
    /// mag/arcsec² when the zenith lies on the galactic plane.
    pub base_at_plane: f64,
    /// Additional mag/arcsec² from `b = 0` to `|b| = 90`.
    pub plane_to_pole_fade: f64,
    /// mag per unit airmass.
    pub extinction_coeff: f64,
    /// Estimates at or below this value count as visible.
    pub visibility_threshold: f64,
}

impl Default for MilkyWayModel {
    fn default() -> Self {
        MilkyWayModel {
            base_at_plane: 20.0,
            plane_to_pole_fade: 2.5,
            extinction_coeff: 0.15,
            visibility_threshold: 21.5,
        }
    }
}

/// Output of [`MilkyWayModel::estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MilkyWayEstimate {
    pub brightness: f64,
    pub visible: bool,
}

impl MilkyWayModel {
    // ---
    /// Estimate at the zenith, where airmass is exactly 1.
    pub fn estimate(&self, galactic_latitude: f64) -> MilkyWayEstimate {
        self.estimate_at(galactic_latitude, 1.0)
    }

    /// Estimate along a line of sight with the given airmass.
    pub fn estimate_at(&self, galactic_latitude: f64, airmass: f64) -> MilkyWayEstimate {
        // ---
        let b = galactic_latitude.abs().min(90.0);
        let at_plane = self.base_at_plane + self.plane_to_pole_fade * (b / 90.0);
        let brightness = at_plane + self.extinction_coeff * (airmass - 1.0);

        MilkyWayEstimate {
            brightness,
            visible: brightness <= self.visibility_threshold,
        }
    }

    /// Fingerprint of the parameter set, stored alongside cached estimates.
    ///
    /// Two models with the same tag produce identical estimates.
    pub fn model_tag(&self) -> String {
        format!(
            "mw:{:.4}/{:.4}/{:.4}/{:.4}",
            self.base_at_plane,
            self.plane_to_pole_fade,
            self.extinction_coeff,
            self.visibility_threshold
        )
    }
}

/// Kasten & Young (1989) relative airmass for a zenith angle in degrees.
///
/// Returns infinity at or below the horizon.
pub fn kasten_young_airmass(zenith_deg: f64) -> f64 {
    // ---
    if zenith_deg >= 90.0 {
        return f64::INFINITY;
    }
    1.0 / (zenith_deg.to_radians().cos() + 0.505_72 * (96.079_95 - zenith_deg).powf(-1.6364))
}
