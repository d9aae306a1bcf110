//! Opened grid datasets and their forward-only layer streams.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use projection::Crs;
use serde::Serialize;
use tracing::debug;

use crate::ascii_grid::AsciiGrid;
use crate::error::{Result, SourceError};
use crate::geometry::{BoundingBox, GridGeometry};

/// Description of one layer (time-step or band).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerInfo {
    pub label: String,
    /// Start of the period the layer covers, or its instant
    pub timestamp: Option<DateTime<Utc>>,
    /// End of the period; `None` for instantaneous or undated layers
    pub end: Option<DateTime<Utc>>,
    /// Entry or file name the layer was read from
    pub source_name: String,
    pub variable: Option<String>,
    pub units: Option<String>,
}

impl LayerInfo {
    /// Length of the period the layer covers.
    pub fn interval(&self) -> Option<chrono::Duration> {
        Some(self.end? - self.timestamp?)
    }
}

/// The values of one layer, row-major with row 0 at the top.
#[derive(Debug, Clone)]
pub struct GridLayer {
    pub info: LayerInfo,
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl GridLayer {
    pub fn label(&self) -> &str {
        &self.info.label
    }

    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.values.get(row * self.cols + col).copied()
    }
}

/// Reads individual layers of an opened source by index.
pub trait LayerReader: Send {
    fn read_layer(&mut self, index: usize) -> Result<AsciiGrid>;
}

/// Everything a format needs to hand over to build a dataset.
pub(crate) struct DatasetParts {
    pub path: PathBuf,
    pub format: &'static str,
    pub crs: Crs,
    pub geometry: GridGeometry,
    pub header_geometry: GridGeometry,
    pub nodata: f64,
    pub layers: Vec<LayerInfo>,
    pub reader: Box<dyn LayerReader>,
}

/// An opened grid source.
///
/// Geometry, CRS and nodata are fixed at open time. Layer values are read
/// lazily, one at a time, through [`GridDataset::layers`]; a layer that has
/// been passed cannot be read again without reopening the source.
pub struct GridDataset {
    path: PathBuf,
    format: &'static str,
    crs: Crs,
    geometry: GridGeometry,
    header_geometry: GridGeometry,
    nodata: f64,
    layers: Vec<LayerInfo>,
    reader: Option<Box<dyn LayerReader>>,
    cursor: usize,
}

impl std::fmt::Debug for GridDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridDataset")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("crs", &self.crs.identifier())
            .field("geometry", &self.geometry)
            .field("layers", &self.layers.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Serializable summary used by `inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub path: PathBuf,
    pub format: &'static str,
    pub crs: Crs,
    pub geometry: GridGeometry,
    pub bbox: BoundingBox,
    pub nodata: f64,
    pub layers: Vec<LayerInfo>,
}

impl GridDataset {
    pub(crate) fn from_parts(parts: DatasetParts) -> Self {
        Self {
            path: parts.path,
            format: parts.format,
            crs: parts.crs,
            geometry: parts.geometry,
            header_geometry: parts.header_geometry,
            nodata: parts.nodata,
            layers: parts.layers,
            reader: Some(parts.reader),
            cursor: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the format that opened the source.
    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn nodata(&self) -> f64 {
        self.nodata
    }

    /// Units of the first layer, when known.
    pub fn units(&self) -> Option<&str> {
        self.layers.first().and_then(|l| l.units.as_deref())
    }

    pub fn layer_infos(&self) -> &[LayerInfo] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            path: self.path.clone(),
            format: self.format,
            crs: self.crs.clone(),
            geometry: self.geometry,
            bbox: self.geometry.bbox(),
            nodata: self.nodata,
            layers: self.layers.clone(),
        }
    }

    /// Stream every layer not yet read, in source order.
    pub fn layers(&mut self) -> LayerStream<'_> {
        let pending = (self.cursor..self.layers.len()).collect();
        LayerStream {
            dataset: self,
            pending,
        }
    }

    /// Stream the given layer indices in source order.
    ///
    /// Indices are sorted and de-duplicated; an index the stream has
    /// already passed yields [`SourceError::Exhausted`].
    pub fn select_layers(&mut self, indices: &[usize]) -> LayerStream<'_> {
        let mut pending: Vec<usize> = indices.to_vec();
        pending.sort_unstable();
        pending.dedup();
        LayerStream {
            dataset: self,
            pending: pending.into(),
        }
    }

    /// Release file handles. Further reads fail.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(path = %self.path.display(), "Closed grid source");
        }
        self.cursor = self.layers.len();
    }

    fn read_layer(&mut self, index: usize) -> Result<GridLayer> {
        if index < self.cursor || index >= self.layers.len() {
            return Err(SourceError::Exhausted(index));
        }
        let reader = self.reader.as_mut().ok_or(SourceError::Exhausted(index))?;
        let grid = reader.read_layer(index)?;
        self.cursor = index + 1;

        let info = self.layers[index].clone();
        let layer_geometry = grid.header.geometry();
        if !layer_geometry.matches(&self.header_geometry) {
            return Err(SourceError::InconsistentGeometry {
                layer: info.label,
                message: format!(
                    "{}x{} grid at ({}, {}) differs from the first layer",
                    grid.header.nrows, grid.header.ncols, grid.header.x_corner, grid.header.y_corner
                ),
            });
        }

        let mut values = grid.values;
        let layer_nodata = grid.header.nodata;
        if layer_nodata != self.nodata {
            for v in values.iter_mut().filter(|v| **v == layer_nodata) {
                *v = self.nodata;
            }
        }

        debug!(layer = %info.label, index, "Read grid layer");
        Ok(GridLayer {
            info,
            rows: self.geometry.rows,
            cols: self.geometry.cols,
            values,
        })
    }
}

/// Forward-only iterator over a dataset's layers.
pub struct LayerStream<'a> {
    dataset: &'a mut GridDataset,
    pending: VecDeque<usize>,
}

impl LayerStream<'_> {
    /// Layers left in this stream.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl Iterator for LayerStream<'_> {
    type Item = Result<GridLayer>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.pending.pop_front()?;
        Some(self.dataset.read_layer(index))
    }
}
