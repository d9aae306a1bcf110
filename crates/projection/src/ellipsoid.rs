//! Reference ellipsoids.

/// A reference ellipsoid given by its semi-major axis and inverse flattening.
///
/// An inverse flattening of `0.0` denotes a sphere, matching the WKT
/// convention used by NCEP products (e.g. `SPHEROID["Sphere",6371229,0]`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis (meters)
    pub semi_major: f64,
    /// Inverse flattening (0 for a sphere)
    pub inverse_flattening: f64,
}

impl Ellipsoid {
    /// WGS 84
    pub const WGS84: Self = Self {
        semi_major: 6_378_137.0,
        inverse_flattening: 298.257_223_563,
    };

    /// GRS 1980 (NAD83)
    pub const GRS80: Self = Self {
        semi_major: 6_378_137.0,
        inverse_flattening: 298.257_222_101,
    };

    /// A sphere of the given radius.
    pub const fn sphere(radius: f64) -> Self {
        Self {
            semi_major: radius,
            inverse_flattening: 0.0,
        }
    }

    pub fn is_sphere(&self) -> bool {
        self.inverse_flattening == 0.0
    }

    pub fn flattening(&self) -> f64 {
        if self.is_sphere() {
            0.0
        } else {
            1.0 / self.inverse_flattening
        }
    }

    /// First eccentricity squared.
    pub fn e2(&self) -> f64 {
        let f = self.flattening();
        2.0 * f - f * f
    }

    /// First eccentricity.
    pub fn e(&self) -> f64 {
        self.e2().sqrt()
    }
}
