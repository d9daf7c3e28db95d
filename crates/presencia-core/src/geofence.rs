//! Great-circle distance and circular geofence checks.

use crate::area::Area;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters (spherical model).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Outcome of a geofence check.
#[derive(Debug, Clone, Copy)]
pub struct FenceCheck {
    pub distance_m: f64,
    pub ok: bool,
}

/// Haversine distance in meters between two coordinate pairs in degrees.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Distance from `probe` to the area center, with boundary-inclusive
/// containment (`distance == radius` is inside).
///
/// Callers must reject missing coordinates before reaching this point; an
/// absent probe is "location unavailable", never "within fence".
pub fn within_fence(probe: Coordinates, area: &Area) -> FenceCheck {
    let distance_m = haversine_m(probe.latitude, probe.longitude, area.latitude, area.longitude);
    FenceCheck {
        distance_m,
        ok: distance_m <= area.radius_m as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area_at(latitude: f64, longitude: f64, radius_m: u32) -> Area {
        Area {
            id: "a".into(),
            name: "A".into(),
            latitude,
            longitude,
            radius_m,
            active: true,
            schedule: None,
        }
    }

    #[test]
    fn zero_distance_for_same_point() {
        assert!(haversine_m(10.5, -66.9, 10.5, -66.9).abs() < 1e-9);
    }

    #[test]
    fn known_distance_one_degree_latitude() {
        // One degree of latitude ≈ 111.19 km on a 6371 km sphere.
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.9).abs() < 100.0, "got {d}");
    }

    #[test]
    fn distance_is_symmetric() {
        let ab = haversine_m(40.4168, -3.7038, 41.3874, 2.1686);
        let ba = haversine_m(41.3874, 2.1686, 40.4168, -3.7038);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn inside_fence_ok() {
        let area = area_at(0.0, 0.0, 200);
        // ~111 m north of center.
        let probe = Coordinates { latitude: 0.001, longitude: 0.0 };
        let check = within_fence(probe, &area);
        assert!(check.ok);
        assert!((check.distance_m - 111.19).abs() < 1.0);
    }

    #[test]
    fn outside_fence_rejected() {
        let area = area_at(0.0, 0.0, 100);
        let probe = Coordinates { latitude: 0.002, longitude: 0.0 };
        let check = within_fence(probe, &area);
        assert!(!check.ok);
        assert!(check.distance_m > 200.0);
    }

    #[test]
    fn boundary_is_inclusive() {
        // Probe ~111.19 m from center: a radius at or above that distance
        // accepts, one below rejects. distance == radius must accept.
        let probe = Coordinates { latitude: 0.001, longitude: 0.0 };
        let distance = within_fence(probe, &area_at(0.0, 0.0, 200)).distance_m;

        let exact = area_at(0.0, 0.0, distance.ceil() as u32);
        assert!(within_fence(probe, &exact).ok);

        let just_under = area_at(0.0, 0.0, distance.floor() as u32);
        assert!(!within_fence(probe, &just_under).ok);
    }
}
