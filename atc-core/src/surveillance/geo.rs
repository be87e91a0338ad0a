//! Great-circle distance/bearing and bounding-box helpers, carried over
//! verbatim (in formula, not code) from
//! `original_source/tracking/adsb_tracker.py`'s
//! `Aircraft.calculate_distance_and_bearing`.

/// Earth radius in nautical miles, per §4.3.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Haversine great-circle distance between two points, nautical miles.
pub fn distance_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_NM * c
}

/// Initial bearing from point 1 to point 2, degrees in `[0, 360)`.
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    let bearing = y.atan2(x).to_degrees();
    (bearing + 360.0) % 360.0
}

/// A lat/lon bounding box used to query a surveillance provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lamin: f64,
    pub lamax: f64,
    pub lomin: f64,
    pub lomax: f64,
}

/// Bounding box around `(lat, lon)` covering a circle of `radius_nm`.
///
/// `Δlat = radius/60`, `Δlon = radius/(60·cos(lat))`, per §4.3.
pub fn bounding_box(lat: f64, lon: f64, radius_nm: f64) -> BoundingBox {
    let lat_delta = radius_nm / 60.0;
    let lon_delta = radius_nm / (60.0 * lat.to_radians().cos());
    BoundingBox {
        lamin: lat - lat_delta,
        lamax: lat + lat_delta,
        lomin: lon - lon_delta,
        lomax: lon + lon_delta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_to_self_is_zero() {
        assert!(distance_nm(45.5, -122.6, 45.5, -122.6).abs() < 1e-9);
    }

    #[test]
    fn one_degree_latitude_is_about_sixty_nm() {
        let d = distance_nm(45.0, -122.0, 46.0, -122.0);
        assert!((d - 60.0).abs() < 1.0, "d={d}");
    }

    #[test]
    fn bearing_due_north_is_zero() {
        let b = bearing_deg(45.0, -122.0, 46.0, -122.0);
        assert!(b.abs() < 0.5 || (b - 360.0).abs() < 0.5, "b={b}");
    }

    #[test]
    fn bearing_due_east_is_ninety() {
        let b = bearing_deg(45.0, -122.0, 45.0, -121.0);
        assert!((b - 90.0).abs() < 1.0, "b={b}");
    }

    #[test]
    fn bounding_box_is_symmetric_around_point() {
        let bbox = bounding_box(45.5, -122.6, 40.0);
        assert!((bbox.lamax - bbox.lamin - 2.0 * (40.0 / 60.0)).abs() < 1e-9);
        let mid_lat = (bbox.lamin + bbox.lamax) / 2.0;
        assert!((mid_lat - 45.5).abs() < 1e-9);
    }

    #[test]
    fn bounding_box_widens_longitude_near_poles() {
        let equator = bounding_box(0.0, 0.0, 40.0);
        let near_pole = bounding_box(70.0, 0.0, 40.0);
        let width = |b: BoundingBox| b.lomax - b.lomin;
        assert!(width(near_pole) > width(equator));
    }
}
