//! Inverse of the relay's `kinematics::local_enu_delta` equirectangular
//! projection: given a local east/north offset in meters from an origin,
//! recover lat/lon. Same constant and small-baseline assumption as the
//! relay side so positions this producer emits land back where the physics
//! model put them once the relay re-derives SOG/COG from them.

const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub fn enu_to_latlon(origin_lat: f64, origin_lon: f64, east_m: f64, north_m: f64) -> (f64, f64) {
    let d_lat = (north_m / EARTH_RADIUS_M).to_degrees();
    let d_lon = (east_m / (EARTH_RADIUS_M * origin_lat.to_radians().cos())).to_degrees();
    (origin_lat + d_lat, origin_lon + d_lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_offset_returns_origin() {
        let (lat, lon) = enu_to_latlon(22.12, 114.12, 0.0, 0.0);
        assert!((lat - 22.12).abs() < 1e-12);
        assert!((lon - 114.12).abs() < 1e-12);
    }

    #[test]
    fn north_offset_increases_latitude_only() {
        let (lat, lon) = enu_to_latlon(22.12, 114.12, 0.0, 100.0);
        assert!(lat > 22.12);
        assert!((lon - 114.12).abs() < 1e-9);
    }

    #[test]
    fn east_offset_increases_longitude_only() {
        let (lat, lon) = enu_to_latlon(22.12, 114.12, 100.0, 0.0);
        assert!((lat - 22.12).abs() < 1e-9);
        assert!(lon > 114.12);
    }
}
