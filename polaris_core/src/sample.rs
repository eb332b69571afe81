//! Measurement samples.
//!
//! A [`Sample`] is one located RSSI reading. It carries both a geographic
//! and a planar representation of its position; setting one invalidates the
//! other until [`Sample::project`] reconciles them through the frame.

use crate::projection::PlanarFrame;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

static NEXT_SAMPLE_ID: AtomicU32 = AtomicU32::new(1);

/// Errors raised when a coordinate representation is read before it exists.
#[derive(Debug, Clone, Error)]
pub enum SampleError {
    #[error("planar coordinates not computed for sample {0}")]
    PlanarNotComputed(u32),

    #[error("geographic coordinates not computed for sample {0}")]
    GeographicNotComputed(u32),

    #[error("insufficient data to project sample {0}")]
    Unprojectable(u32),
}

/// One located RSSI measurement.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Process-unique identifier, assigned on construction.
    pub id: u32,
    /// The planar frame shared by all samples of a run.
    pub frame: PlanarFrame,
    /// Received signal strength, dBm-like integer.
    pub rssi: i32,
    /// Measurement timestamp in milliseconds.
    pub timestamp_ms: i64,
    /// Network identifier, when the capture recorded one.
    pub ssid: Option<String>,
    /// Observing device identifier.
    pub device_id: Option<String>,

    latitude: f64,
    longitude: f64,
    x: f64,
    y: f64,
    geo_valid: bool,
    planar_valid: bool,
}

impl Sample {
    /// Build a sample from a geographic fix and project it into `frame`.
    pub fn new(
        latitude: f64,
        longitude: f64,
        frame: PlanarFrame,
        rssi: i32,
        timestamp_ms: i64,
        ssid: Option<String>,
        device_id: Option<String>,
    ) -> Self {
        let (x, y) = frame.to_planar(latitude, longitude);
        Self {
            id: NEXT_SAMPLE_ID.fetch_add(1, Ordering::Relaxed),
            frame,
            rssi,
            timestamp_ms,
            ssid,
            device_id,
            latitude,
            longitude,
            x,
            y,
            geo_valid: true,
            planar_valid: true,
        }
    }

    /// Build a sample directly from planar coordinates. The geographic pair
    /// stays unset until [`Sample::project`] runs.
    pub fn from_planar(x: f64, y: f64, frame: PlanarFrame, rssi: i32, timestamp_ms: i64) -> Self {
        Self {
            id: NEXT_SAMPLE_ID.fetch_add(1, Ordering::Relaxed),
            frame,
            rssi,
            timestamp_ms,
            ssid: None,
            device_id: None,
            latitude: 0.0,
            longitude: 0.0,
            x,
            y,
            geo_valid: false,
            planar_valid: true,
        }
    }

    pub fn latitude(&self) -> Result<f64, SampleError> {
        if !self.geo_valid {
            return Err(SampleError::GeographicNotComputed(self.id));
        }
        Ok(self.latitude)
    }

    pub fn longitude(&self) -> Result<f64, SampleError> {
        if !self.geo_valid {
            return Err(SampleError::GeographicNotComputed(self.id));
        }
        Ok(self.longitude)
    }

    pub fn x(&self) -> Result<f64, SampleError> {
        if !self.planar_valid {
            return Err(SampleError::PlanarNotComputed(self.id));
        }
        Ok(self.x)
    }

    pub fn y(&self) -> Result<f64, SampleError> {
        if !self.planar_valid {
            return Err(SampleError::PlanarNotComputed(self.id));
        }
        Ok(self.y)
    }

    /// Both planar coordinates at once.
    pub fn planar(&self) -> Result<(f64, f64), SampleError> {
        if !self.planar_valid {
            return Err(SampleError::PlanarNotComputed(self.id));
        }
        Ok((self.x, self.y))
    }

    /// Replace the planar position. Invalidates the geographic pair.
    pub fn set_planar(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
        self.planar_valid = true;
        self.geo_valid = false;
    }

    /// Replace the geographic position. Invalidates the planar pair.
    pub fn set_geographic(&mut self, latitude: f64, longitude: f64) {
        self.latitude = latitude;
        self.longitude = longitude;
        self.geo_valid = true;
        self.planar_valid = false;
    }

    /// Recompute whichever representation is missing from the other.
    ///
    /// A no-op when both are valid; fails when neither is.
    pub fn project(&mut self) -> Result<(), SampleError> {
        match (self.geo_valid, self.planar_valid) {
            (true, true) => Ok(()),
            (true, false) => {
                let (x, y) = self.frame.to_planar(self.latitude, self.longitude);
                self.x = x;
                self.y = y;
                self.planar_valid = true;
                Ok(())
            }
            (false, true) => {
                let (lat, lon) = self.frame.to_geographic(self.x, self.y);
                self.latitude = lat;
                self.longitude = lon;
                self.geo_valid = true;
                Ok(())
            }
            (false, false) => Err(SampleError::Unprojectable(self.id)),
        }
    }

    /// Whether the geographic fix is a usable coordinate.
    pub fn has_valid_geographic(&self) -> bool {
        self.geo_valid
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> PlanarFrame {
        PlanarFrame::new(59.8586, 17.6389)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Sample::new(59.86, 17.64, frame(), -50, 0, None, None);
        let b = Sample::new(59.86, 17.64, frame(), -50, 0, None, None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_construction_projects_both_pairs() {
        let s = Sample::new(59.8586, 17.6389, frame(), -40, 123, None, None);
        assert_eq!(s.x().unwrap(), 0.0);
        assert_eq!(s.y().unwrap(), 0.0);
        assert_eq!(s.latitude().unwrap(), 59.8586);
    }

    #[test]
    fn test_set_planar_invalidates_geo() {
        let mut s = Sample::new(59.8586, 17.6389, frame(), -40, 0, None, None);
        s.set_planar(10.0, 20.0);
        assert!(s.latitude().is_err());
        s.project().unwrap();
        let lat = s.latitude().unwrap();
        let lon = s.longitude().unwrap();
        // Re-projecting from the recovered geographic fix lands on the same spot
        let (x, y) = s.frame.to_planar(lat, lon);
        assert!((x - 10.0).abs() < 1e-6);
        assert!((y - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_unprojectable_without_any_pair() {
        let mut s = Sample::from_planar(1.0, 2.0, frame(), -40, 0);
        assert!(s.latitude().is_err());
        s.project().unwrap();
        assert!(s.latitude().is_ok());
    }

    #[test]
    fn test_valid_geographic_bounds() {
        let s = Sample::new(91.0, 0.0, frame(), -40, 0, None, None);
        assert!(!s.has_valid_geographic());
        let s = Sample::new(f64::NAN, 0.0, frame(), -40, 0, None, None);
        assert!(!s.has_valid_geographic());
        let s = Sample::new(59.0, 17.0, frame(), -40, 0, None, None);
        assert!(s.has_valid_geographic());
    }
}
