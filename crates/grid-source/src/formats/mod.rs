//! Format detection and the readers behind it.
//!
//! Each format contributes a probe to [`REGISTRY`]; probes are tried in
//! order and the first one that claims a path opens it.

mod archive;
mod ascii;
mod directory;
mod snodas;

use std::path::Path;

use projection::Crs;
use tracing::{debug, info};

use crate::ascii_grid::AsciiHeader;
use crate::dataset::{DatasetParts, GridDataset, LayerInfo, LayerReader};
use crate::error::{Result, SourceError};
use crate::geometry::GridGeometry;
use crate::metadata::describe_file;

/// Options applied when opening a source.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// CRS to use instead of (or in the absence of) a `.prj` sidecar.
    pub source_crs: Option<Crs>,
    /// Variable to read from sources holding several products.
    pub variable: Option<String>,
}

impl OpenOptions {
    pub fn with_source_crs(mut self, crs: Crs) -> Self {
        self.source_crs = Some(crs);
        self
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }
}

/// A registered grid format.
pub struct FormatProbe {
    pub name: &'static str,
    pub probe: fn(&Path) -> bool,
    pub open: fn(&Path, &OpenOptions) -> Result<GridDataset>,
}

/// Registered formats, most specific first.
pub static REGISTRY: &[FormatProbe] = &[
    FormatProbe {
        name: "grid-directory",
        probe: directory::probe,
        open: directory::open,
    },
    FormatProbe {
        name: "snodas-tar",
        probe: snodas::probe,
        open: snodas::open,
    },
    FormatProbe {
        name: "grid-tar",
        probe: archive::probe,
        open: archive::open,
    },
    FormatProbe {
        name: "esri-ascii",
        probe: ascii::probe,
        open: ascii::open,
    },
];

/// Name of the format that would open `path`.
pub fn detect_format(path: &Path) -> Option<&'static str> {
    REGISTRY.iter().find(|f| (f.probe)(path)).map(|f| f.name)
}

/// Open a grid source, detecting its format.
pub fn open(path: &Path, options: &OpenOptions) -> Result<GridDataset> {
    if !path.exists() {
        return Err(SourceError::NotFound(path.to_path_buf()));
    }
    let format = REGISTRY
        .iter()
        .find(|f| (f.probe)(path))
        .ok_or_else(|| SourceError::Unrecognized(path.to_path_buf()))?;
    debug!(path = %path.display(), format = format.name, "Detected grid format");

    let dataset = (format.open)(path, options)?;
    info!(
        path = %path.display(),
        format = format.name,
        crs = %dataset.crs(),
        rows = dataset.geometry().rows,
        cols = dataset.geometry().cols,
        layers = dataset.layer_count(),
        "Opened grid source"
    );
    Ok(dataset)
}

/// Sidecar contents found next to the first grid.
#[derive(Debug, Default)]
struct Sidecars {
    prj: Option<String>,
    world: Option<(String, String)>,
}

const WORLD_FILE_EXTENSIONS: &[&str] = &["wld", "asw"];

/// Parse the six lines of an ESRI world file.
fn parse_world_file(name: &str, text: &str) -> Result<[f64; 6]> {
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| SourceError::header(name, "world file contains a non-numeric line"))?;
    <[f64; 6]>::try_from(values.as_slice())
        .map_err(|_| SourceError::header(name, format!("world file must have 6 values, found {}", values.len())))
}

/// Resolve the dataset CRS: explicit override first, then the `.prj` text.
fn resolve_crs(path: &Path, prj: Option<&str>, options: &OpenOptions) -> Result<Crs> {
    if let Some(crs) = &options.source_crs {
        return Ok(crs.clone());
    }
    match prj {
        Some(wkt) => Ok(Crs::from_wkt(wkt.trim())?),
        None => Err(SourceError::MissingSpatialReference(path.to_path_buf())),
    }
}

fn layer_info(name: &str) -> LayerInfo {
    let meta = describe_file(name);
    LayerInfo {
        label: meta.label,
        timestamp: meta.timestamp,
        end: meta.end,
        source_name: name.rsplit('/').next().unwrap_or(name).to_string(),
        variable: meta.variable,
        units: meta.units,
    }
}

/// Combine a format's pieces into a dataset.
fn assemble(
    path: &Path,
    format: &'static str,
    layer_names: &[String],
    first_header: &AsciiHeader,
    sidecars: Sidecars,
    options: &OpenOptions,
    reader: Box<dyn LayerReader>,
) -> Result<GridDataset> {
    let crs = resolve_crs(path, sidecars.prj.as_deref(), options)?;
    let header_geometry = first_header.geometry();

    let geometry = match &sidecars.world {
        Some((name, text)) => {
            let params = parse_world_file(name, text)?;
            debug!(world_file = %name, "Using world file georeferencing");
            GridGeometry::from_world_file(params, first_header.nrows, first_header.ncols)
        }
        None => header_geometry,
    };

    let mut layers: Vec<LayerInfo> = layer_names.iter().map(|n| layer_info(n)).collect();
    make_labels_unique(&mut layers);

    Ok(GridDataset::from_parts(DatasetParts {
        path: path.to_path_buf(),
        format,
        crs,
        geometry,
        header_geometry,
        nodata: first_header.nodata,
        layers,
        reader,
    }))
}

/// Suffix repeated labels with `_2`, `_3`, ... so output names stay distinct.
fn make_labels_unique(layers: &mut [LayerInfo]) {
    let mut seen = std::collections::HashMap::<String, usize>::new();
    for layer in layers.iter_mut() {
        let count = seen.entry(layer.label.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            layer.label = format!("{}_{}", layer.label, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_world_file() {
        let params = parse_world_file("a.wld", "0.5\n0.0\n0.0\n-0.5\n10.25\n20.75\n").unwrap();
        assert_eq!(params, [0.5, 0.0, 0.0, -0.5, 10.25, 20.75]);
        assert!(parse_world_file("a.wld", "1\n2\n3\n").is_err());
        assert!(parse_world_file("a.wld", "1\n2\nx\n4\n5\n6\n").is_err());
    }

    #[test]
    fn test_resolve_crs_prefers_override() {
        let options = OpenOptions::default().with_source_crs(Crs::parse("EPSG:5070").unwrap());
        let crs = resolve_crs(Path::new("x.asc"), Some(test_utils::WGS84_PRJ), &options).unwrap();
        assert_eq!(crs.epsg_code(), Some(5070));

        let err = resolve_crs(Path::new("x.asc"), None, &OpenOptions::default()).unwrap_err();
        assert!(matches!(err, SourceError::MissingSpatialReference(_)));
    }

    #[test]
    fn test_make_labels_unique() {
        let mut layers = vec![layer_info("a.asc"), layer_info("a.asc.gz"), layer_info("b.asc")];
        make_labels_unique(&mut layers);
        let labels: Vec<&str> = layers.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "a_2", "b"]);
    }
}
