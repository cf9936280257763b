//! Geographic point and great-circle distance.

use geo::{Centroid, MultiPoint, Point};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for all distance math, in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic point (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates.
    ///
    /// Providers use `0` as a "no coordinate" placeholder, so a zero on
    /// either axis is rejected as well.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        if latitude == 0.0 || longitude == 0.0 {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }

    /// Haversine distance to another point in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        distance_km(*self, *other)
    }
}

impl From<GeoPoint> for Point<f64> {
    fn from(p: GeoPoint) -> Self {
        Point::new(p.longitude, p.latitude)
    }
}

/// Haversine great-circle distance between two points, in kilometres.
pub fn distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards asin against rounding drift slightly above 1.0
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Arithmetic mean of a set of points (mean latitude, mean longitude).
///
/// Only meaningful for small areas such as a single postal-code prefix.
pub fn centroid<I>(points: I) -> Option<GeoPoint>
where
    I: IntoIterator<Item = GeoPoint>,
{
    let multi: MultiPoint<f64> = points.into_iter().map(Point::from).collect();
    multi.centroid().map(|c| GeoPoint {
        latitude: c.y(),
        longitude: c.x(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_distance_identical_points_is_zero() {
        let a = p(-23.5614, -46.6558);
        assert_eq!(distance_km(a, a), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = p(-23.5614, -46.6558);
        let b = p(-22.9068, -43.1729);
        assert_eq!(distance_km(a, b), distance_km(b, a));
    }

    #[test]
    fn test_distance_sao_paulo_rio() {
        // Avenida Paulista to central Rio de Janeiro
        let a = p(-23.5614, -46.6558);
        let b = p(-22.9068, -43.1729);
        let d = distance_km(a, b);
        assert!((d - 362.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_one_degree_latitude() {
        let d = distance_km(p(-10.0, -45.0), p(-11.0, -45.0));
        assert!((d - 111.19).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_rejects_invalid_coordinates() {
        assert!(GeoPoint::new(f64::NAN, -46.0).is_none());
        assert!(GeoPoint::new(-91.0, -46.0).is_none());
        assert!(GeoPoint::new(-23.0, 181.0).is_none());
        assert!(GeoPoint::new(0.0, -46.0).is_none());
        assert!(GeoPoint::new(-23.0, 0.0).is_none());
    }

    #[test]
    fn test_centroid_is_mean() {
        let c = centroid(vec![p(-23.0, -46.0), p(-24.0, -47.0)]).unwrap();
        assert!((c.latitude + 23.5).abs() < 1e-9);
        assert!((c.longitude + 46.5).abs() < 1e-9);
    }

    #[test]
    fn test_centroid_empty() {
        assert!(centroid(Vec::new()).is_none());
    }
}
