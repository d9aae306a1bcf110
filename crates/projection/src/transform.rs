//! Coordinate transform pipelines between two CRSs.
//!
//! Every pipeline goes through geographic longitude/latitude: the source
//! coordinate is inverse-projected (if projected), then forward-projected
//! into the target (if projected). WGS84 and NAD83 are treated as
//! coincident (null datum shift), which is below the resolution of the
//! grids this crate targets.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::albers::AlbersEqualArea;
use crate::crs::{Crs, CrsKind};
use crate::error::{ProjectionError, Result};
use crate::lambert::LambertConformal;
use crate::mercator::WebMercator;

/// A map projection between geographic degrees and projected units.
pub trait MapProjection: Send + Sync + fmt::Debug {
    /// Geographic (lon, lat) degrees to projected (x, y).
    fn forward(&self, lon: f64, lat: f64) -> Result<(f64, f64)>;

    /// Projected (x, y) to geographic (lon, lat) degrees.
    fn inverse(&self, x: f64, y: f64) -> Result<(f64, f64)>;
}

/// Wrap an angle in radians into [-PI, PI].
pub fn normalize_longitude(lam: f64) -> f64 {
    if lam.abs() <= PI {
        lam
    } else {
        (lam + PI).rem_euclid(TAU) - PI
    }
}

/// Transforms a single coordinate pair from one CRS into another.
pub trait CoordinateTransform: Send + Sync + fmt::Debug {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)>;

    /// True when `transform` returns its input unchanged.
    fn is_identity(&self) -> bool {
        false
    }
}

/// Source and target are the same system.
#[derive(Debug, Clone, Default)]
pub struct IdentityTransform;

impl CoordinateTransform for IdentityTransform {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok((x, y))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Endpoint {
    Geographic,
    Projected(Arc<dyn MapProjection>),
}

impl Endpoint {
    fn for_crs(crs: &Crs) -> Option<Result<Self>> {
        let projection: Arc<dyn MapProjection> = match crs.kind() {
            CrsKind::Geographic { .. } => return Some(Ok(Self::Geographic)),
            CrsKind::WebMercator => Arc::new(WebMercator),
            CrsKind::AlbersEqualArea(p) => match AlbersEqualArea::new(p) {
                Ok(proj) => Arc::new(proj),
                Err(e) => return Some(Err(e)),
            },
            CrsKind::LambertConformalConic(p) => match LambertConformal::new(p) {
                Ok(proj) => Arc::new(proj),
                Err(e) => return Some(Err(e)),
            },
            CrsKind::Custom { .. } => return None,
        };
        Some(Ok(Self::Projected(projection)))
    }
}

/// Inverse-then-forward pipeline through geographic coordinates.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    source: Endpoint,
    target: Endpoint,
    source_id: String,
}

impl TransformPipeline {
    /// Build a pipeline, failing with `NoTransform` when either side is a
    /// custom system.
    pub fn new(from: &Crs, to: &Crs) -> Result<Self> {
        let no_transform = || ProjectionError::no_transform(from.identifier(), to.identifier());
        let source = Endpoint::for_crs(from).ok_or_else(no_transform)??;
        let target = Endpoint::for_crs(to).ok_or_else(no_transform)??;
        Ok(Self {
            source,
            target,
            source_id: from.identifier(),
        })
    }
}

impl CoordinateTransform for TransformPipeline {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let (lon, lat) = match &self.source {
            Endpoint::Geographic => {
                if !x.is_finite() || !y.is_finite() || y.abs() > 90.0 {
                    return Err(ProjectionError::out_of_domain(x, y, self.source_id.clone()));
                }
                (x, y)
            }
            Endpoint::Projected(proj) => proj.inverse(x, y)?,
        };

        match &self.target {
            Endpoint::Geographic => Ok((normalize_longitude(lon.to_radians()).to_degrees(), lat)),
            Endpoint::Projected(proj) => proj.forward(lon, lat),
        }
    }
}

/// Creates transforms between CRSs.
pub trait TransformProvider: Send + Sync {
    fn create(&self, from: &Crs, to: &Crs) -> Result<Arc<dyn CoordinateTransform>>;
}

/// Provider backed by the projections implemented in this crate.
#[derive(Debug, Clone, Default)]
pub struct BuiltinTransforms;

impl TransformProvider for BuiltinTransforms {
    fn create(&self, from: &Crs, to: &Crs) -> Result<Arc<dyn CoordinateTransform>> {
        if from.is_equivalent(to) {
            debug!(crs = %from, "Using identity transform");
            return Ok(Arc::new(IdentityTransform));
        }
        let pipeline = TransformPipeline::new(from, to)?;
        debug!(from = %from, to = %to, "Built transform pipeline");
        Ok(Arc::new(pipeline))
    }
}
