//! Grid-to-point conversion engine.
//!
//! Turns every cell of a georeferenced grid into a point at the cell centre,
//! optionally reprojected, carrying the cell's (transformed) value:
//!
//! - [`resolver`]: cell-centre coordinates and cached CRS transforms
//! - [`transform`]: nodata handling, scale/offset and unit conversion
//! - [`emitter`]: GeoJSON, CSV and shapefile point writers
//! - [`orchestrator`]: the per-run state machine tying them together
//!
//! ```no_run
//! use point_converter::{convert, ConversionContext, ConversionRequest, OutputFormat};
//!
//! let request = ConversionRequest::new("data/prism", "out")
//!     .with_format(OutputFormat::Csv)
//!     .with_target_crs("EPSG:3857");
//! let result = convert(&request, &ConversionContext::new())?;
//! println!("{} points", result.counts.records_written);
//! # Ok::<(), point_converter::ConversionError>(())
//! ```

pub mod config;
pub mod context;
pub mod emitter;
pub mod error;
pub mod orchestrator;
pub mod request;
pub mod resolver;
pub mod result;
pub mod spill;
pub mod transform;
pub mod units;

pub use config::EngineConfig;
pub use context::{CancellationToken, ConversionContext, Progress};
pub use emitter::{
    begin_dataset, DatasetHandle, DatasetSummary, FieldDef, FieldType, OutputPointRecord,
    PointSchema,
};
pub use error::{ConversionError, EmitError, ErrorContext, ErrorKind};
pub use orchestrator::{convert, Converter, RunState};
pub use request::{
    AttributeOptions, ConversionRequest, ErrorPolicy, NodataPolicy, OutputFormat, OutputMode,
    ValueTransformOptions,
};
pub use resolver::{cell_center, CellLocator, CoordinateResolver, ResolverStats};
pub use result::{ConversionCounts, ConversionResult};
pub use transform::ValueTransform;
pub use units::{Unit, UnitConversion};
