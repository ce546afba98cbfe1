//! Great-circle distance.

use super::types::Coordinate;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two coordinates in kilometres.
pub fn distance_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let (lat1, lat2) = (a.latitude().to_radians(), b.latitude().to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude() - a.longitude()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::types::AccuracySource;
    use approx::assert_relative_eq;

    fn at(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon, AccuracySource::Precise, None).unwrap()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let jakarta = at(-6.2088, 106.8456);
        assert_eq!(distance_km(&jakarta, &jakarta), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let jakarta = at(-6.2088, 106.8456);
        let bandung = at(-6.9175, 107.6191);
        assert_relative_eq!(
            distance_km(&jakarta, &bandung),
            distance_km(&bandung, &jakarta),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_one_degree_latitude_at_equator() {
        let d = distance_km(&at(0.0, 0.0), &at(1.0, 0.0));
        assert_relative_eq!(d, 111.19, max_relative = 0.01);
    }

    #[test]
    fn test_jakarta_bandung() {
        // Roughly 115-120 km as the crow flies.
        let d = distance_km(&at(-6.2088, 106.8456), &at(-6.9175, 107.6191));
        assert!(d > 110.0 && d < 125.0, "got {d}");
    }

    #[test]
    fn test_antipodal_points() {
        let d = distance_km(&at(0.0, 0.0), &at(0.0, 180.0));
        assert_relative_eq!(d, std::f64::consts::PI * EARTH_RADIUS_KM, max_relative = 1e-9);
    }
}
