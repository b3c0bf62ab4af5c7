//! Position samples as delivered by the mount feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::astro::{estimate_azimuth, Site};
use crate::error::SensorArtifact;

/// One report from the position source.
///
/// Samples may arrive from a push feed or a fixed-interval poll; the engine
/// only relies on `timestamp` being the time the report was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// When the report was taken.
    pub timestamp: DateTime<Utc>,
    /// Mount driver connected.
    pub connected: bool,
    /// Mount reports a slew in progress.
    pub slewing: bool,
    /// Sidereal tracking enabled.
    pub tracking_enabled: bool,
    /// Mount reports it is parked at its home position.
    #[serde(default)]
    pub at_home: bool,
    /// Right ascension, hours.
    pub ra_hours: f64,
    /// Declination, degrees.
    pub dec_degrees: f64,
    /// Local sidereal time, hours.
    pub lst_hours: f64,
    /// Site latitude, degrees.
    #[serde(default)]
    pub site_lat_degrees: f64,
    /// Site longitude, degrees.
    #[serde(default)]
    pub site_lon_degrees: f64,
    /// Azimuth as reported by the mount hardware.
    #[serde(default)]
    pub raw_azimuth_degrees: f64,
}

impl PositionSample {
    /// Site geometry carried by this sample.
    pub fn site(&self) -> Site {
        Site {
            latitude_deg: self.site_lat_degrees,
            longitude_deg: self.site_lon_degrees,
        }
    }

    /// Azimuth estimate for this sample.
    pub fn azimuth(&self) -> f64 {
        estimate_azimuth(
            self.ra_hours,
            self.dec_degrees,
            self.lst_hours,
            self.site(),
            self.raw_azimuth_degrees,
        )
    }

    /// Reject samples whose numeric fields cannot be trusted.
    ///
    /// A disconnected sample carries no usable coordinates and always passes.
    pub fn validate(&self) -> Result<(), SensorArtifact> {
        if !self.connected {
            return Ok(());
        }
        let fields = [
            ("ra_hours", self.ra_hours),
            ("dec_degrees", self.dec_degrees),
            ("lst_hours", self.lst_hours),
            ("site_lat_degrees", self.site_lat_degrees),
            ("site_lon_degrees", self.site_lon_degrees),
            ("raw_azimuth_degrees", self.raw_azimuth_degrees),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(SensorArtifact::NonFinite { field });
            }
        }
        Ok(())
    }
}
