//! Error types for opening and reading grid sources.

use std::path::PathBuf;

use projection::ProjectionError;
use thiserror::Error;

/// Errors that can occur while opening or streaming a grid source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The path does not exist.
    #[error("grid source not found: {0}")]
    NotFound(PathBuf),

    /// No registered format recognised the path.
    #[error("unrecognised grid format: {0}")]
    Unrecognized(PathBuf),

    /// Failed to read from the source.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The grid header is missing a key or has an invalid value.
    #[error("invalid grid header in {name}: {message}")]
    InvalidHeader { name: String, message: String },

    /// The cell matrix does not match the header.
    #[error("invalid grid data in {name}: {message}")]
    InvalidData { name: String, message: String },

    /// A layer disagrees with the dataset's geometry.
    #[error("layer {layer} does not match the dataset geometry: {message}")]
    InconsistentGeometry { layer: String, message: String },

    /// The grid has no `.prj` sidecar and no CRS override was given.
    #[error("missing spatial reference for {0}")]
    MissingSpatialReference(PathBuf),

    /// The spatial reference could not be resolved.
    #[error("invalid spatial reference: {0}")]
    Crs(#[from] ProjectionError),

    /// The requested variable is not present in the source.
    #[error("variable '{variable}' not found; available: {}", .available.join(", "))]
    UnknownVariable {
        variable: String,
        available: Vec<String>,
    },

    /// A directory or archive contains no grids.
    #[error("no grid layers found in {0}")]
    Empty(PathBuf),

    /// A layer was requested that the stream has already passed.
    #[error("layer {0} has already been read; reopen the source to restart")]
    Exhausted(usize),
}

impl SourceError {
    /// Create an Io error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an InvalidHeader error.
    pub fn header(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidData error.
    pub fn data(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidData {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type for grid source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
