//! Error types for CRS resolution and coordinate transforms.

use thiserror::Error;

/// Errors raised while resolving a CRS or transforming a coordinate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// The CRS identifier is not one this crate knows.
    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),

    /// The WKT text could not be parsed.
    #[error("invalid WKT at byte {position}: {message}")]
    InvalidWkt { position: usize, message: String },

    /// Projection parameters are degenerate.
    #[error("invalid projection parameters: {0}")]
    InvalidParameters(String),

    /// No transform pipeline exists between the two systems.
    #[error("no transform defined from {from} to {to}")]
    NoTransform { from: String, to: String },

    /// The coordinate lies outside the valid domain of the CRS.
    #[error("coordinate ({x}, {y}) is outside the valid domain of {crs}")]
    OutOfDomain { x: f64, y: f64, crs: String },

    /// Iterative inverse did not converge.
    #[error("inverse projection did not converge for ({x}, {y})")]
    NoConvergence { x: f64, y: f64 },
}

impl ProjectionError {
    /// Create an OutOfDomain error.
    pub fn out_of_domain(x: f64, y: f64, crs: impl Into<String>) -> Self {
        Self::OutOfDomain {
            x,
            y,
            crs: crs.into(),
        }
    }

    /// Create a NoTransform error.
    pub fn no_transform(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::NoTransform {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
