//! Spherical Web Mercator (EPSG:3857).

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use crate::error::{ProjectionError, Result};
use crate::transform::{normalize_longitude, MapProjection};

/// Radius of the auxiliary sphere (WGS84 semi-major axis).
const RADIUS: f64 = 6_378_137.0;

/// Latitude limit where the square world ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Default)]
pub struct WebMercator;

impl MapProjection for WebMercator {
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > MAX_LATITUDE + 1e-9 {
            return Err(ProjectionError::out_of_domain(lon, lat, "EPSG:3857"));
        }
        let lam = normalize_longitude(lon.to_radians());
        let phi = lat.to_radians();
        Ok((RADIUS * lam, RADIUS * (FRAC_PI_4 + phi / 2.0).tan().ln()))
    }

    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() || x.abs() > PI * RADIUS * (1.0 + 1e-12) {
            return Err(ProjectionError::out_of_domain(x, y, "EPSG:3857"));
        }
        let lon = (x / RADIUS).to_degrees();
        let lat = (2.0 * (y / RADIUS).exp().atan() - FRAC_PI_2).to_degrees();
        Ok((lon, lat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_extent() {
        let (x, y) = WebMercator.forward(180.0, MAX_LATITUDE).unwrap();
        assert!((x - 20_037_508.342_789_244).abs() < 1e-6);
        assert!((y - 20_037_508.342_789_244).abs() < 1e-3);
    }

    #[test]
    fn test_rejects_poles() {
        assert!(WebMercator.forward(0.0, 89.0).is_err());
        assert!(WebMercator.forward(0.0, -86.0).is_err());
    }
}
