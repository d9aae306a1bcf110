//! Grid source readers.
//!
//! Opens georeferenced raster grids and exposes their geometry, CRS and a
//! forward-only stream of layers. Supported sources:
//! - a single ESRI ASCII grid (`.asc`, optionally gzip-compressed)
//! - a directory of ESRI ASCII grids (one layer per file)
//! - a tar archive of ESRI ASCII grids (one layer per entry)
//! - a SNODAS daily archive (one product chosen with
//!   [`OpenOptions::variable`], one layer per day)
//!
//! ```ignore
//! use grid_source::{open, OpenOptions};
//!
//! let mut dataset = open(Path::new("ppt_2024.tar"), &OpenOptions::default())?;
//! for layer in dataset.layers() {
//!     let layer = layer?;
//!     println!("{} has {} cells", layer.label(), layer.values.len());
//! }
//! ```

pub mod ascii_grid;
pub mod dataset;
pub mod error;
pub mod formats;
pub mod geometry;
pub mod metadata;

pub use dataset::{DatasetSummary, GridDataset, GridLayer, LayerInfo, LayerReader, LayerStream};
pub use error::{Result, SourceError};
pub use formats::{detect_format, open, OpenOptions, REGISTRY};
pub use geometry::{BoundingBox, GeoTransform, GridGeometry};
