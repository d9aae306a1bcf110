//! Albers Equal Area Conic projection (ellipsoidal form).
//!
//! Formulas follow Snyder, "Map Projections: A Working Manual" (USGS PP 1395),
//! equations 14-1 through 14-21 and 3-16.

use std::f64::consts::FRAC_PI_2;

use crate::crs::ConicParams;
use crate::error::{ProjectionError, Result};
use crate::transform::{normalize_longitude, MapProjection};

const EPS: f64 = 1e-10;
const MAX_ITER: usize = 30;

#[derive(Debug, Clone)]
pub struct AlbersEqualArea {
    a: f64,
    e: f64,
    e2: f64,
    n: f64,
    c: f64,
    rho0: f64,
    lon0: f64,
    false_easting: f64,
    false_northing: f64,
    linear_unit: f64,
}

impl AlbersEqualArea {
    pub fn new(p: &ConicParams) -> Result<Self> {
        let e2 = p.ellipsoid.e2();
        let e = e2.sqrt();
        let phi0 = p.lat0.to_radians();
        let phi1 = p.lat1.to_radians();
        let phi2 = p.lat2.to_radians();

        if (phi1 + phi2).abs() < EPS {
            return Err(ProjectionError::InvalidParameters(
                "Albers standard parallels are symmetric about the equator".into(),
            ));
        }
        if p.linear_unit <= 0.0 {
            return Err(ProjectionError::InvalidParameters(
                "linear unit must be positive".into(),
            ));
        }

        let mut proj = Self {
            a: p.ellipsoid.semi_major,
            e,
            e2,
            n: 0.0,
            c: 0.0,
            rho0: 0.0,
            lon0: p.lon0.to_radians(),
            false_easting: p.false_easting,
            false_northing: p.false_northing,
            linear_unit: p.linear_unit,
        };

        let m1 = msfn(phi1, e2);
        let m2 = msfn(phi2, e2);
        let q0 = proj.qsfn(phi0);
        let q1 = proj.qsfn(phi1);
        let q2 = proj.qsfn(phi2);

        proj.n = if (phi1 - phi2).abs() > EPS {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        } else {
            phi1.sin()
        };
        proj.c = m1 * m1 + proj.n * q1;
        proj.rho0 = proj.a * (proj.c - proj.n * q0).max(0.0).sqrt() / proj.n;

        Ok(proj)
    }

    fn qsfn(&self, phi: f64) -> f64 {
        let s = phi.sin();
        if self.e < EPS {
            return 2.0 * s;
        }
        let es = self.e * s;
        (1.0 - self.e2) * (s / (1.0 - es * es) - (1.0 / (2.0 * self.e)) * ((1.0 - es) / (1.0 + es)).ln())
    }

    /// Latitude from authalic q (Snyder 3-16).
    fn phi_from_q(&self, q: f64, x: f64, y: f64) -> Result<f64> {
        let q_pole = self.qsfn(FRAC_PI_2);
        if q.abs() >= q_pole - 1e-12 {
            return Ok(FRAC_PI_2.copysign(q));
        }

        let mut phi = (q / 2.0).clamp(-1.0, 1.0).asin();
        if self.e < EPS {
            return Ok(phi);
        }
        for _ in 0..MAX_ITER {
            let s = phi.sin();
            let cos = phi.cos();
            let es = self.e * s;
            let one = 1.0 - es * es;
            let delta = one * one / (2.0 * cos)
                * (q / (1.0 - self.e2) - s / one
                    + (1.0 / (2.0 * self.e)) * ((1.0 - es) / (1.0 + es)).ln());
            phi += delta;
            if delta.abs() < 1e-14 {
                return Ok(phi);
            }
        }
        Err(ProjectionError::NoConvergence { x, y })
    }
}

/// `m` of Snyder eq. 14-15.
fn msfn(phi: f64, e2: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - e2 * s * s).sqrt()
}

impl MapProjection for AlbersEqualArea {
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
            return Err(ProjectionError::out_of_domain(lon, lat, "Albers Equal Area"));
        }
        let phi = lat.to_radians();
        let lam = normalize_longitude(lon.to_radians() - self.lon0);

        let inner = self.c - self.n * self.qsfn(phi);
        if inner < -1e-12 {
            return Err(ProjectionError::out_of_domain(lon, lat, "Albers Equal Area"));
        }
        let rho = self.a * inner.max(0.0).sqrt() / self.n;
        let theta = self.n * lam;

        let x = rho * theta.sin();
        let y = self.rho0 - rho * theta.cos();
        Ok((
            x / self.linear_unit + self.false_easting,
            y / self.linear_unit + self.false_northing,
        ))
    }

    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProjectionError::out_of_domain(x, y, "Albers Equal Area"));
        }
        let xm = (x - self.false_easting) * self.linear_unit;
        let dy = self.rho0 - (y - self.false_northing) * self.linear_unit;

        let (rho, theta) = if self.n < 0.0 {
            (-xm.hypot(dy), (-xm).atan2(-dy))
        } else {
            (xm.hypot(dy), xm.atan2(dy))
        };

        let q = (self.c - (rho * self.n / self.a).powi(2)) / self.n;
        let phi = self.phi_from_q(q, x, y)?;
        let lam = normalize_longitude(self.lon0 + theta / self.n);

        let (lon, lat) = (lam.to_degrees(), phi.to_degrees());
        if !lat.is_finite() || lat.abs() > 90.0 {
            return Err(ProjectionError::out_of_domain(x, y, "Albers Equal Area"));
        }
        Ok((lon, lat))
    }
}
