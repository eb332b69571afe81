//! Local planar frame tangent to Earth at a reference coordinate.
//!
//! All geometry downstream of sample ingestion runs in a Cartesian frame
//! (meters) anchored at a reference latitude/longitude. The map is the
//! equirectangular approximation, which is accurate to floating-point
//! precision within a few kilometers of the anchor.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Earth radius in meters, calibrated for the Uppsala region.
pub const EARTH_RADIUS_METERS: f64 = 6_362_475.0;

/// A planar frame tangent to Earth at `(origin_lat, origin_lon)`.
///
/// Forward map:
/// ```text
/// x = R * (lon - lon0) * pi/180 * cos(lat0 * pi/180)
/// y = R * (lat - lat0) * pi/180
/// ```
/// The inverse is the algebraic inverse of the same formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarFrame {
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub earth_radius: f64,
}

impl PlanarFrame {
    /// Frame anchored at the given coordinate with the calibrated Earth radius.
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            earth_radius: EARTH_RADIUS_METERS,
        }
    }

    /// Frame with an explicit sphere radius.
    pub fn with_radius(origin_lat: f64, origin_lon: f64, earth_radius: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            earth_radius,
        }
    }

    /// Project a geographic coordinate into the planar frame (meters).
    pub fn to_planar(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        let lat_rad = (latitude - self.origin_lat) * (PI / 180.0);
        let lon_rad = (longitude - self.origin_lon) * (PI / 180.0);

        let x = self.earth_radius * lon_rad * (self.origin_lat * (PI / 180.0)).cos();
        let y = self.earth_radius * lat_rad;
        (x, y)
    }

    /// Back-project a planar coordinate to geographic degrees.
    pub fn to_geographic(&self, x: f64, y: f64) -> (f64, f64) {
        let lat_rad = y / self.earth_radius;
        let lon_rad = x / (self.earth_radius * (self.origin_lat * (PI / 180.0)).cos());

        let latitude = self.origin_lat + lat_rad * (180.0 / PI);
        let longitude = self.origin_lon + lon_rad * (180.0 / PI);
        (latitude, longitude)
    }
}

/// Haversine distance in meters between two geographic coordinates.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = PI / 180.0;
    let dlat = (lat2 - lat1) * to_rad;
    let dlon = (lon2 - lon1) * to_rad;
    let a = (dlat / 2.0).sin() * (dlat / 2.0).sin()
        + (lat1 * to_rad).cos() * (lat2 * to_rad).cos() * (dlon / 2.0).sin() * (dlon / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_trip_within_10km() {
        let frame = PlanarFrame::new(59.8586, 17.6389); // Uppsala
        // Offsets up to ~10 km from the origin
        let offsets = [
            (0.0, 0.0),
            (0.01, 0.01),
            (-0.05, 0.03),
            (0.09, -0.08),
            (-0.0899, 0.0899),
        ];
        for (dlat, dlon) in offsets {
            let lat = frame.origin_lat + dlat;
            let lon = frame.origin_lon + dlon;
            let (x, y) = frame.to_planar(lat, lon);
            let (lat2, lon2) = frame.to_geographic(x, y);
            assert!((lat - lat2).abs() < 1e-6, "lat round trip off: {lat} vs {lat2}");
            assert!((lon - lon2).abs() < 1e-6, "lon round trip off: {lon} vs {lon2}");
        }
    }

    #[test]
    fn test_forward_map_axes() {
        let frame = PlanarFrame::new(0.0, 0.0);
        // One degree of latitude at the equator
        let (x, y) = frame.to_planar(1.0, 0.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(y, EARTH_RADIUS_METERS * PI / 180.0, epsilon = 1e-6);

        // One degree of longitude at the equator (cos(0) = 1)
        let (x, y) = frame.to_planar(0.0, 1.0);
        assert_relative_eq!(x, EARTH_RADIUS_METERS * PI / 180.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_haversine_matches_planar_locally() {
        let frame = PlanarFrame::new(59.8586, 17.6389);
        let lat = frame.origin_lat + 0.005;
        let lon = frame.origin_lon + 0.005;
        let (x, y) = frame.to_planar(lat, lon);
        let planar = (x * x + y * y).sqrt();
        let hav = haversine_distance(frame.origin_lat, frame.origin_lon, lat, lon);
        // Small-scale agreement between the two metrics
        assert_relative_eq!(planar, hav, max_relative = 1e-3);
    }
}
