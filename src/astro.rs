//! Pointing geometry helpers.
//!
//! The mount's own azimuth readout jumps around mid-slew and reports a
//! placeholder near the home position, so azimuth is derived from RA/Dec,
//! local sidereal time and the site instead. The inverse transform is used by
//! the unwind maneuver to turn "safe altitude at azimuth X" into a slew target.
//!
//! Conventions: RA and LST in hours `[0, 24)`, everything else in degrees,
//! azimuth N=0°, E=90°, S=180°, W=270°.

use std::f64::consts::PI;

/// Sites with both coordinates this close to zero are treated as unconfigured.
const UNCONFIGURED_SITE_EPSILON_DEG: f64 = 1e-6;

const HOURS_TO_RAD: f64 = PI / 12.0;

/// Observing site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    /// Latitude in degrees, north positive.
    pub latitude_deg: f64,
    /// Longitude in degrees, east positive.
    pub longitude_deg: f64,
}

impl Site {
    /// Whether the site looks like a real location rather than the 0/0
    /// placeholder a mount reports before it has been configured.
    pub fn is_configured(&self) -> bool {
        !(self.latitude_deg.abs() < UNCONFIGURED_SITE_EPSILON_DEG
            && self.longitude_deg.abs() < UNCONFIGURED_SITE_EPSILON_DEG)
    }
}

/// Normalize an angle to `[0, 360)`.
pub fn normalize_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Normalize an hour angle / RA to `[0, 24)`.
pub fn normalize_hours(hours: f64) -> f64 {
    let wrapped = hours.rem_euclid(24.0);
    if wrapped >= 24.0 {
        0.0
    } else {
        wrapped
    }
}

/// Fold a raw azimuth difference into `[-180, 180]`.
///
/// `fold_degrees(0.5 - 359.5)` is `+1.0`, not `-359.0`.
pub fn fold_degrees(delta: f64) -> f64 {
    if delta > 180.0 {
        delta - 360.0
    } else if delta < -180.0 {
        delta + 360.0
    } else {
        delta
    }
}

/// Fold a raw RA difference into `[-12, 12]` hours.
///
/// `fold_hours(0.05 - 23.95)` is `+0.1`, not `-23.9`.
pub fn fold_hours(delta: f64) -> f64 {
    if delta > 12.0 {
        delta - 24.0
    } else if delta < -12.0 {
        delta + 24.0
    } else {
        delta
    }
}

/// Azimuth of an equatorial position, in degrees `[0, 360)`.
///
/// Falls back to `raw_azimuth_deg` when the site is unconfigured, since the
/// trig is meaningless without a real latitude.
pub fn estimate_azimuth(
    ra_hours: f64,
    dec_deg: f64,
    lst_hours: f64,
    site: Site,
    raw_azimuth_deg: f64,
) -> f64 {
    if !site.is_configured() {
        return normalize_degrees(raw_azimuth_deg);
    }

    let ha = (lst_hours - ra_hours) * HOURS_TO_RAD;
    let dec = dec_deg.to_radians();
    let lat = site.latitude_deg.to_radians();

    let y = -dec.cos() * ha.sin();
    let x = dec.sin() * lat.cos() - dec.cos() * ha.cos() * lat.sin();
    normalize_degrees(y.atan2(x).to_degrees())
}

/// Equatorial coordinates `(ra_hours, dec_deg)` of a horizontal position.
///
/// Inverse of [`estimate_azimuth`] for a configured site.
pub fn horizontal_to_equatorial(
    altitude_deg: f64,
    azimuth_deg: f64,
    lst_hours: f64,
    site: Site,
) -> (f64, f64) {
    let alt = altitude_deg.to_radians();
    let az = azimuth_deg.to_radians();
    let lat = site.latitude_deg.to_radians();

    let sin_dec = (alt.sin() * lat.sin() + alt.cos() * lat.cos() * az.cos()).clamp(-1.0, 1.0);
    let dec = sin_dec.asin();

    let y = -az.sin() * alt.cos() * lat.cos();
    let x = alt.sin() - sin_dec * lat.sin();
    let ha_hours = y.atan2(x) / HOURS_TO_RAD;

    (normalize_hours(lst_hours - ha_hours), dec.to_degrees())
}
