//! Geodesy: geodetic points, the anchored local frame, and range/bearing
//! helpers.
//!
//! The local Cartesian frame is anchored at the first accepted GNSS fix and
//! uses an equirectangular approximation, which is accurate to well under a
//! centimeter over a residential work area. Haversine is used for distances
//! expressed between geodetic points. All trigonometry here is f64; the
//! local frame hands out f32 to the rest of the stack.

use serde::{Deserialize, Serialize};

use super::types::Point2D;

/// Mean Earth radius in meters (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A WGS-84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPoint {
    /// Latitude in decimal degrees, [-90, 90]
    pub latitude: f64,
    /// Longitude in decimal degrees, (-180, 180]
    pub longitude: f64,
}

impl GeodeticPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the coordinates are inside the valid WGS-84 ranges.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude)
            && self.longitude > -180.0
            && self.longitude <= 180.0
    }

    /// Haversine great-circle distance to another point, in meters.
    pub fn haversine_distance(&self, other: &GeodeticPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Initial bearing from this point toward another, radians in [-π, π].
    ///
    /// Zero is due east to match the local frame's x axis; counter-clockwise
    /// positive.
    pub fn bearing_to(&self, other: &GeodeticPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        // atan2(y, x) is the bearing clockwise from north; convert to
        // math convention (east = 0, CCW positive)
        let north_cw = y.atan2(x);
        let east_ccw = std::f64::consts::FRAC_PI_2 - north_cw;
        // normalize to (-π, π]
        let mut a = east_ccw % std::f64::consts::TAU;
        if a > std::f64::consts::PI {
            a -= std::f64::consts::TAU;
        } else if a <= -std::f64::consts::PI {
            a += std::f64::consts::TAU;
        }
        a
    }
}

/// Local Cartesian frame anchored at a geodetic origin.
///
/// x points east, y points north. Conversions use the equirectangular
/// approximation with the cosine taken at the anchor latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalFrame {
    origin: GeodeticPoint,
    /// cos(origin latitude), cached
    cos_lat0: f64,
}

impl LocalFrame {
    /// Anchor a frame at `origin` (typically the first accepted GNSS fix).
    pub fn new(origin: GeodeticPoint) -> Self {
        Self {
            origin,
            cos_lat0: origin.latitude.to_radians().cos(),
        }
    }

    /// The anchor point.
    pub fn origin(&self) -> GeodeticPoint {
        self.origin
    }

    /// Project a geodetic point into local meters.
    pub fn to_local(&self, point: &GeodeticPoint) -> Point2D {
        let dlat = (point.latitude - self.origin.latitude).to_radians();
        let dlon = (point.longitude - self.origin.longitude).to_radians();
        Point2D::new(
            (EARTH_RADIUS_M * dlon * self.cos_lat0) as f32,
            (EARTH_RADIUS_M * dlat) as f32,
        )
    }

    /// Unproject local meters back to a geodetic point.
    pub fn to_geodetic(&self, point: &Point2D) -> GeodeticPoint {
        let dlat = point.y as f64 / EARTH_RADIUS_M;
        let dlon = point.x as f64 / (EARTH_RADIUS_M * self.cos_lat0);
        GeodeticPoint::new(
            self.origin.latitude + dlat.to_degrees(),
            self.origin.longitude + dlon.to_degrees(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ankara() -> GeodeticPoint {
        GeodeticPoint::new(39.9334, 32.8597)
    }

    #[test]
    fn test_validity_ranges() {
        assert!(ankara().is_valid());
        assert!(!GeodeticPoint::new(91.0, 0.0).is_valid());
        assert!(!GeodeticPoint::new(0.0, -180.0).is_valid());
        assert!(GeodeticPoint::new(0.0, 180.0).is_valid());
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2 km
        let a = GeodeticPoint::new(39.0, 32.0);
        let b = GeodeticPoint::new(40.0, 32.0);
        let d = a.haversine_distance(&b);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = ankara();
        let north = GeodeticPoint::new(origin.latitude + 0.01, origin.longitude);
        let east = GeodeticPoint::new(origin.latitude, origin.longitude + 0.01);

        assert_relative_eq!(
            origin.bearing_to(&north),
            std::f64::consts::FRAC_PI_2,
            epsilon = 1e-3
        );
        assert_relative_eq!(origin.bearing_to(&east), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_local_frame_axes() {
        let frame = LocalFrame::new(ankara());
        let north = GeodeticPoint::new(39.9334 + 0.001, 32.8597);
        let p = frame.to_local(&north);
        assert!(p.x.abs() < 0.01);
        assert!((p.y - 111.2).abs() < 0.5, "got {}", p.y);
    }

    #[test]
    fn test_geodetic_roundtrip_within_1km() {
        let frame = LocalFrame::new(ankara());
        // Sample a 1 km square around the anchor
        for &(x, y) in &[
            (500.0f32, 500.0f32),
            (-500.0, 500.0),
            (500.0, -500.0),
            (-500.0, -500.0),
            (123.4, -987.6),
        ] {
            let geo = frame.to_geodetic(&Point2D::new(x, y));
            let back = frame.to_local(&geo);
            let geo2 = frame.to_geodetic(&back);
            assert!(
                (geo2.latitude - geo.latitude).abs() < 1e-6,
                "lat drift {}",
                geo2.latitude - geo.latitude
            );
            assert!(
                (geo2.longitude - geo.longitude).abs() < 1e-6,
                "lon drift {}",
                geo2.longitude - geo.longitude
            );
        }
    }

    #[test]
    fn test_local_distance_matches_haversine() {
        let frame = LocalFrame::new(ankara());
        let other = GeodeticPoint::new(39.9370, 32.8640);
        let local = frame.to_local(&other);
        let planar = (local.x as f64).hypot(local.y as f64);
        let great_circle = ankara().haversine_distance(&other);
        // Sub-permille agreement at this range
        assert!((planar - great_circle).abs() / great_circle < 1e-3);
    }
}
