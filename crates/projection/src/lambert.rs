//! Lambert Conformal Conic projection.
//!
//! This projection is commonly used for weather grids (HRRR, RTMA, NAM).
//! It maps a cone tangent or secant to the Earth's surface onto a flat plane.
//!
//! The projection parameters include:
//! - Latitude of origin (lat0)
//! - Central meridian (lon0, LoV in GRIB2)
//! - Standard parallel(s): lat1 and lat2 (equal for a tangent cone / 1SP)
//! - Scale factor at the origin (1SP variant)
//!
//! Ellipsoidal formulas follow Snyder eqs. 15-1 through 15-11 and 7-9.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use crate::crs::ConicParams;
use crate::error::{ProjectionError, Result};
use crate::transform::{normalize_longitude, MapProjection};

const EPS: f64 = 1e-10;
const MAX_ITER: usize = 30;

/// Lambert Conformal Conic projection constants.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    a: f64,
    e: f64,
    /// Cone constant (n)
    n: f64,
    /// F constant, pre-multiplied by the scale factor
    f: f64,
    /// Rho at the latitude of origin
    rho0: f64,
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
    linear_unit: f64,
}

impl LambertConformal {
    pub fn new(p: &ConicParams) -> Result<Self> {
        let e = p.ellipsoid.e();
        let phi0 = p.lat0.to_radians();
        let phi1 = p.lat1.to_radians();
        let phi2 = p.lat2.to_radians();

        if (phi1 + phi2).abs() < EPS || (phi1.abs() - FRAC_PI_2).abs() < EPS {
            return Err(ProjectionError::InvalidParameters(
                "Lambert standard parallels must not be symmetric or polar".into(),
            ));
        }
        if p.linear_unit <= 0.0 || p.scale_factor <= 0.0 {
            return Err(ProjectionError::InvalidParameters(
                "linear unit and scale factor must be positive".into(),
            ));
        }

        let m1 = msfn(phi1, e);
        let t1 = tsfn(phi1, e);

        // Compute cone constant n
        let n = if (phi1 - phi2).abs() < EPS {
            // Tangent cone (single standard parallel)
            phi1.sin()
        } else {
            // Secant cone (two standard parallels)
            let m2 = msfn(phi2, e);
            let t2 = tsfn(phi2, e);
            (m1.ln() - m2.ln()) / (t1.ln() - t2.ln())
        };

        let f = m1 / (n * t1.powf(n)) * p.scale_factor;
        let a = p.ellipsoid.semi_major;
        let rho0 = a * f * tsfn(phi0, e).powf(n);

        Ok(Self {
            a,
            e,
            n,
            f,
            rho0,
            lon0: p.lon0.to_radians(),
            false_easting: p.false_easting,
            false_northing: p.false_northing,
            linear_unit: p.linear_unit,
        })
    }

    /// Cone constant.
    pub fn cone_constant(&self) -> f64 {
        self.n
    }
}

fn msfn(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    phi.cos() / (1.0 - es * es).sqrt()
}

fn tsfn(phi: f64, e: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

impl MapProjection for LambertConformal {
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(ProjectionError::out_of_domain(lon, lat, "Lambert Conformal Conic"));
        }
        let phi = lat.to_radians();

        // The pole opposite the cone's apex maps to infinity
        if (phi.abs() - FRAC_PI_2).abs() < EPS && phi * self.n <= 0.0 {
            return Err(ProjectionError::out_of_domain(lon, lat, "Lambert Conformal Conic"));
        }

        let rho = if (phi.abs() - FRAC_PI_2).abs() < EPS {
            0.0
        } else {
            self.a * self.f * tsfn(phi, self.e).powf(self.n)
        };
        let theta = self.n * normalize_longitude(lon.to_radians() - self.lon0);

        let x = rho * theta.sin();
        let y = self.rho0 - rho * theta.cos();
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::out_of_domain(lon, lat, "Lambert Conformal Conic"));
        }
        Ok((
            x / self.linear_unit + self.false_easting,
            y / self.linear_unit + self.false_northing,
        ))
    }

    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::out_of_domain(x, y, "Lambert Conformal Conic"));
        }
        let xm = (x - self.false_easting) * self.linear_unit;
        let dy = self.rho0 - (y - self.false_northing) * self.linear_unit;
        let sign = self.n.signum();

        let rho = sign * xm.hypot(dy);
        let theta = (sign * xm).atan2(sign * dy);
        let lam = normalize_longitude(self.lon0 + theta / self.n);

        if rho.abs() < EPS {
            return Ok((lam.to_degrees(), (FRAC_PI_2 * sign).to_degrees()));
        }

        let t = (rho / (self.a * self.f)).powf(1.0 / self.n);
        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        let mut converged = self.e < EPS;
        for _ in 0..MAX_ITER {
            if converged {
                break;
            }
            let es = self.e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            converged = (next - phi).abs() < 1e-14;
            phi = next;
        }
        if !converged {
            return Err(ProjectionError::NoConvergence { x, y });
        }

        let lat = phi.to_degrees();
        if !lat.is_finite() || lat.abs() > 90.0 {
            return Err(ProjectionError::out_of_domain(x, y, "Lambert Conformal Conic"));
        }
        Ok((lam.to_degrees(), lat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ellipsoid::Ellipsoid;

    /// HRRR uses a tangent cone at 38.5N, LoV 97.5W on a 6371229 m sphere.
    fn hrrr() -> LambertConformal {
        LambertConformal::new(&ConicParams {
            ellipsoid: Ellipsoid::sphere(6_371_229.0),
            lat0: 38.5,
            lon0: -97.5,
            lat1: 38.5,
            lat2: 38.5,
            false_easting: 0.0,
            false_northing: 0.0,
            scale_factor: 1.0,
            linear_unit: 1.0,
        })
        .unwrap()
    }

    #[test]
    fn test_hrrr_origin() {
        let proj = hrrr();
        let (x, y) = proj.forward(-97.5, 38.5).unwrap();
        assert!(x.abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_hrrr_first_grid_point() {
        // HRRR's first grid point, 1.0 m tolerance
        let proj = hrrr();
        let (x, y) = proj.forward(-122.719528, 21.138123).unwrap();
        assert!((x + 2_697_520.142_521_929).abs() < 1.0, "x = {}", x);
        assert!((y + 1_587_306.152_556_665).abs() < 1.0, "y = {}", y);
        let (lon, lat) = proj.inverse(x, y).unwrap();
        assert!((lon + 122.719528).abs() < 1e-9 && (lat - 21.138123).abs() < 1e-9);
    }

    #[test]
    fn test_roundtrip_ellipsoidal_secant() {
        let proj = LambertConformal::new(&ConicParams {
            ellipsoid: Ellipsoid::GRS80,
            lat0: 23.0,
            lon0: -96.0,
            lat1: 33.0,
            lat2: 45.0,
            false_easting: 0.0,
            false_northing: 0.0,
            scale_factor: 1.0,
            linear_unit: 1.0,
        })
        .unwrap();

        for (lon, lat) in [(-94.5, 39.0), (-120.0, 25.0), (-70.0, 50.0)] {
            let (x, y) = proj.forward(lon, lat).unwrap();
            let (lon2, lat2) = proj.inverse(x, y).unwrap();
            assert!((lon - lon2).abs() < 1e-9, "lon roundtrip failed: {} vs {}", lon, lon2);
            assert!((lat - lat2).abs() < 1e-9, "lat roundtrip failed: {} vs {}", lat, lat2);
        }
    }

    #[test]
    fn test_opposite_pole_out_of_domain() {
        assert!(hrrr().forward(0.0, -90.0).is_err());
        assert!(hrrr().forward(0.0, 90.0).is_ok());
    }
}
