//! Conversion requests and their options.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use projection::Crs;
use serde::{Deserialize, Serialize};

use crate::error::ConversionError;
use crate::units::{Unit, UnitConversion};

/// Output vector format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Geojson,
    Csv,
    Shapefile,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Geojson => "geojson",
            Self::Csv => "csv",
            Self::Shapefile => "shp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Geojson => "geojson",
            Self::Csv => "csv",
            Self::Shapefile => "shapefile",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "geojson" | "json" => Ok(Self::Geojson),
            "csv" => Ok(Self::Csv),
            "shapefile" | "shp" | "esri" => Ok(Self::Shapefile),
            _ => Err(format!("unknown output format '{}'", s)),
        }
    }
}

/// How layers map onto output datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// One dataset per layer with a single value attribute.
    #[default]
    PerLayer,
    /// One dataset with one attribute column per layer.
    MultiColumn,
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "per_layer" | "single" => Ok(Self::PerLayer),
            "multi_column" | "multi" => Ok(Self::MultiColumn),
            _ => Err(format!("unknown output mode '{}'", s)),
        }
    }
}

/// What to do with cells holding the nodata sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodataPolicy {
    /// Skip the cell (null column in multi-column mode).
    #[default]
    Drop,
    /// Emit the point with a null attribute.
    PassThrough,
    /// Emit the point with this value.
    Substitute(f64),
}

impl fmt::Display for NodataPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop => f.write_str("drop"),
            Self::PassThrough => f.write_str("pass_through"),
            Self::Substitute(v) => write!(f, "substitute={}", v),
        }
    }
}

impl FromStr for NodataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((key, value)) = s.split_once('=') {
            if key.trim().eq_ignore_ascii_case("substitute") {
                let value: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid substitute value '{}'", value))?;
                if !value.is_finite() {
                    return Err("substitute value must be finite".to_string());
                }
                return Ok(Self::Substitute(value));
            }
        }
        match s.to_lowercase().replace('-', "_").as_str() {
            "drop" => Ok(Self::Drop),
            "pass_through" | "passthrough" | "null" => Ok(Self::PassThrough),
            _ => Err(format!(
                "unknown nodata policy '{}' (expected drop, pass_through or substitute=VALUE)",
                s
            )),
        }
    }
}

impl TryFrom<String> for NodataPolicy {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodataPolicy> for String {
    fn from(policy: NodataPolicy) -> Self {
        policy.to_string()
    }
}

/// Per-cell value handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueTransformOptions {
    pub nodata: NodataPolicy,
    pub scale: f64,
    pub offset: f64,
    pub from_units: Option<Unit>,
    pub to_units: Option<Unit>,
}

impl Default for ValueTransformOptions {
    fn default() -> Self {
        Self {
            nodata: NodataPolicy::Drop,
            scale: 1.0,
            offset: 0.0,
            from_units: None,
            to_units: None,
        }
    }
}

impl ValueTransformOptions {
    /// Resolve the unit conversion, if any.
    pub fn unit_conversion(&self) -> Result<UnitConversion, String> {
        match (self.from_units, self.to_units) {
            (None, None) => Ok(UnitConversion::IDENTITY),
            (Some(from), Some(to)) => UnitConversion::between(from, to),
            _ => Err("from_units and to_units must be given together".to_string()),
        }
    }
}

/// Reaction to a cell that cannot be reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    FailFast,
    SkipCell,
}

/// Attribute naming in the output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeOptions {
    /// Attribute name in per-layer mode.
    pub value_field: String,
    /// Add integer `row`/`col` attributes.
    pub include_cell_index: bool,
}

impl Default for AttributeOptions {
    fn default() -> Self {
        Self {
            value_field: "value".to_string(),
            include_cell_index: false,
        }
    }
}

/// Everything needed for one conversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Grid file, tar archive, or directory of grids.
    pub source: PathBuf,

    /// Source CRS override (`EPSG:n` or WKT); used instead of any `.prj`.
    #[serde(default)]
    pub source_crs: Option<String>,

    /// Variable to read from multi-product sources such as SNODAS archives.
    #[serde(default)]
    pub variable: Option<String>,

    /// Output CRS; the source CRS when unset.
    #[serde(default)]
    pub target_crs: Option<String>,

    pub output_dir: PathBuf,

    /// Base name of output datasets; the source stem when unset.
    #[serde(default)]
    pub output_name: Option<String>,

    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default)]
    pub mode: OutputMode,

    /// Layer labels to convert; all layers when unset.
    #[serde(default)]
    pub layers: Option<Vec<String>>,

    #[serde(default)]
    pub values: ValueTransformOptions,

    #[serde(default)]
    pub on_reprojection_error: ErrorPolicy,

    #[serde(default)]
    pub attributes: AttributeOptions,
}

impl ConversionRequest {
    pub fn new(source: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            source_crs: None,
            variable: None,
            target_crs: None,
            output_dir: output_dir.into(),
            output_name: None,
            format: OutputFormat::default(),
            mode: OutputMode::default(),
            layers: None,
            values: ValueTransformOptions::default(),
            on_reprojection_error: ErrorPolicy::default(),
            attributes: AttributeOptions::default(),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_target_crs(mut self, crs: impl Into<String>) -> Self {
        self.target_crs = Some(crs.into());
        self
    }

    pub fn with_source_crs(mut self, crs: impl Into<String>) -> Self {
        self.source_crs = Some(crs.into());
        self
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }

    pub fn with_layers<S: Into<String>>(mut self, layers: impl IntoIterator<Item = S>) -> Self {
        self.layers = Some(layers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_nodata(mut self, policy: NodataPolicy) -> Self {
        self.values.nodata = policy;
        self
    }

    pub fn with_scale_offset(mut self, scale: f64, offset: f64) -> Self {
        self.values.scale = scale;
        self.values.offset = offset;
        self
    }

    pub fn with_units(mut self, from: Unit, to: Unit) -> Self {
        self.values.from_units = Some(from);
        self.values.to_units = Some(to);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_reprojection_error = policy;
        self
    }

    pub fn with_cell_index(mut self) -> Self {
        self.attributes.include_cell_index = true;
        self
    }

    /// Parsed source CRS override.
    pub fn source_crs(&self) -> Result<Option<Crs>, ConversionError> {
        self.source_crs.as_deref().map(parse_crs).transpose()
    }

    /// Parsed target CRS, if one was requested.
    pub fn target_crs(&self) -> Result<Option<Crs>, ConversionError> {
        self.target_crs.as_deref().map(parse_crs).transpose()
    }

    /// Base name for output datasets.
    pub fn output_base(&self) -> String {
        if let Some(name) = &self.output_name {
            return sanitize_name(name);
        }
        let name = self
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "points".to_string());
        sanitize_name(strip_source_extensions(&name))
    }

    /// Check the request before any file is touched.
    pub fn validate(&self) -> Result<(), ConversionError> {
        let invalid = |message: String| ConversionError::invalid_request(message);

        if self.source.as_os_str().is_empty() {
            return Err(invalid("source path is empty".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(invalid("output_dir is empty".to_string()));
        }
        if self.output_dir.exists() && !self.output_dir.is_dir() {
            return Err(invalid(format!(
                "output_dir {} is not a directory",
                self.output_dir.display()
            )));
        }
        if let Some(name) = &self.output_name {
            if sanitize_name(name).is_empty() {
                return Err(invalid("output_name is empty".to_string()));
            }
        }

        if matches!(&self.variable, Some(v) if v.trim().is_empty()) {
            return Err(invalid("variable is empty".to_string()));
        }
        self.source_crs()?;
        self.target_crs()?;

        if !self.values.scale.is_finite() || !self.values.offset.is_finite() {
            return Err(invalid("scale and offset must be finite".to_string()));
        }
        self.values.unit_conversion().map_err(invalid)?;

        if let Some(layers) = &self.layers {
            if layers.is_empty() {
                return Err(invalid("layer selection is empty".to_string()));
            }
        }
        if self.mode == OutputMode::PerLayer && self.attributes.value_field.trim().is_empty() {
            return Err(invalid("value_field is empty".to_string()));
        }
        Ok(())
    }
}

fn parse_crs(s: &str) -> Result<Crs, ConversionError> {
    Crs::parse(s).map_err(|e| ConversionError::invalid_request(format!("invalid CRS '{}': {}", s, e)))
}

fn strip_source_extensions(name: &str) -> &str {
    let name = name.strip_suffix(".gz").unwrap_or(name);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() <= 4 => stem,
        _ => name,
    }
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Output path for one dataset.
pub fn output_path(dir: &Path, base: &str, label: Option<&str>, format: OutputFormat) -> PathBuf {
    let name = match label {
        Some(label) => format!("{}_{}", base, sanitize_name(label)),
        None => base.to_string(),
    };
    dir.join(format!("{}.{}", name, format.extension()))
}
