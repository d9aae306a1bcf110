//! Coordinate reference systems and map projection transforms.
//!
//! Implements the projections used by gridded climate and weather products
//! from scratch: Web Mercator, Albers Equal Area and Lambert Conformal
//! Conic, plus WKT parsing for `.prj` sidecars.

pub mod albers;
pub mod crs;
pub mod ellipsoid;
pub mod error;
pub mod lambert;
pub mod mercator;
pub mod transform;
pub mod wkt;

pub use albers::AlbersEqualArea;
pub use crs::{ConicParams, Crs, CrsCode, CrsKind};
pub use ellipsoid::Ellipsoid;
pub use error::{ProjectionError, Result};
pub use lambert::LambertConformal;
pub use mercator::WebMercator;
pub use transform::{
    BuiltinTransforms, CoordinateTransform, IdentityTransform, MapProjection, TransformPipeline,
    TransformProvider,
};
