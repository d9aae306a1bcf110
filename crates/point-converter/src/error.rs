//! Error types for the conversion engine.

use std::fmt;
use std::path::PathBuf;

use grid_source::SourceError;
use projection::ProjectionError;
use serde::Serialize;
use thiserror::Error;

/// Classification of a failed conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The source is malformed, unsupported, or lacks georeferencing.
    UnreadableSource,
    /// A CRS pair has no transform, or a coordinate fell outside the
    /// target's valid domain under the fail-fast policy.
    Reprojection,
    /// The output schema cannot represent a value.
    Encoding,
    /// The request or engine configuration is invalid.
    InvalidRequest,
    /// Output files could not be created or written.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnreadableSource => "unreadable source",
            Self::Reprojection => "reprojection error",
            Self::Encoding => "encoding error",
            Self::InvalidRequest => "invalid request",
            Self::Io => "I/O error",
        };
        f.write_str(s)
    }
}

/// Where a failure happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorContext {
    pub dataset: Option<PathBuf>,
    pub layer: Option<String>,
    /// `(row, col)` of the failing cell
    pub cell: Option<(usize, usize)>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dataset) = &self.dataset {
            write!(f, " [dataset {}]", dataset.display())?;
        }
        if let Some(layer) = &self.layer {
            write!(f, " [layer {}]", layer)?;
        }
        if let Some((row, col)) = self.cell {
            write!(f, " [cell row {}, col {}]", row, col)?;
        }
        Ok(())
    }
}

/// A failed conversion run.
///
/// `orphaned_outputs` lists datasets completed before the failure; they are
/// left on disk for the caller to keep or remove.
#[derive(Error, Debug, Clone, Serialize)]
#[error("{kind}: {message}{context}")]
pub struct ConversionError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    pub orphaned_outputs: Vec<PathBuf>,
}

impl ConversionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
            orphaned_outputs: Vec::new(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn with_dataset(mut self, dataset: impl Into<PathBuf>) -> Self {
        self.context.dataset = Some(dataset.into());
        self
    }

    pub fn with_layer(mut self, layer: impl Into<String>) -> Self {
        self.context.layer = Some(layer.into());
        self
    }

    pub fn with_cell(mut self, row: usize, col: usize) -> Self {
        self.context.cell = Some((row, col));
        self
    }
}

impl From<SourceError> for ConversionError {
    fn from(err: SourceError) -> Self {
        let kind = match err {
            SourceError::UnknownVariable { .. } => ErrorKind::InvalidRequest,
            _ => ErrorKind::UnreadableSource,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<ProjectionError> for ConversionError {
    fn from(err: ProjectionError) -> Self {
        Self::new(ErrorKind::Reprojection, err.to_string())
    }
}

impl From<EmitError> for ConversionError {
    fn from(err: EmitError) -> Self {
        let kind = if err.is_io() {
            ErrorKind::Io
        } else {
            ErrorKind::Encoding
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors raised by the point emitters.
#[derive(Error, Debug)]
pub enum EmitError {
    /// Output file could not be created or written.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A value cannot be represented in the declared field type.
    #[error("cannot encode {field} = {value}: {reason}")]
    Encoding {
        field: String,
        value: f64,
        reason: String,
    },

    /// A field name the output format cannot store.
    #[error("invalid field name '{name}': {reason}")]
    InvalidFieldName { name: String, reason: String },

    /// A record does not match the dataset schema.
    #[error("record has {found} values but the schema declares {expected}")]
    SchemaMismatch { expected: usize, found: usize },

    /// CSV writer error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Shapefile writer error.
    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The dataset has already been ended.
    #[error("dataset has already been ended")]
    Closed,
}

impl EmitError {
    /// Create an Io error for a path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an Encoding error.
    pub fn encoding(field: impl Into<String>, value: f64, reason: impl Into<String>) -> Self {
        Self::Encoding {
            field: field.into(),
            value,
            reason: reason.into(),
        }
    }

    /// True when the failure came from the filesystem rather than the data.
    pub fn is_io(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Csv(e) => e.is_io_error(),
            Self::Shapefile(shapefile::Error::IoError(_)) => true,
            Self::Shapefile(shapefile::Error::DbaseError(e)) => {
                matches!(e.kind(), shapefile::dbase::ErrorKind::IoError(_))
            }
            Self::Json(e) => e.is_io(),
            _ => false,
        }
    }
}
