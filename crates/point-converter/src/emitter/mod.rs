//! Point dataset writers.
//!
//! A run opens a dataset with [`begin_dataset`], writes records through the
//! returned [`DatasetHandle`], and either ends it or abandons it. A handle
//! dropped without either is still flushed and closed.

mod delimited;
mod esri;
mod geojson;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use projection::Crs;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EmitError;
use crate::request::OutputFormat;

pub use esri::shapefile_field_names;

/// Attribute type in the output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Float64,
    Int64,
}

/// An attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
}

/// Attributes written with every point, fixed before the first record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointSchema {
    value_fields: Vec<String>,
    include_cell_index: bool,
}

impl PointSchema {
    /// Value field names that repeat `row`/`col` (when the cell index is
    /// written) or an earlier field are suffixed `_2`, `_3`, ...
    pub fn new(value_fields: Vec<String>, include_cell_index: bool) -> Self {
        let reserved: &[&str] = if include_cell_index { &["row", "col"] } else { &[] };
        Self {
            value_fields: unique_field_names(&value_fields, reserved),
            include_cell_index,
        }
    }

    pub fn value_fields(&self) -> &[String] {
        &self.value_fields
    }

    pub fn include_cell_index(&self) -> bool {
        self.include_cell_index
    }

    /// Every attribute in output order: `row`, `col` (when enabled), then
    /// the value fields.
    pub fn fields(&self) -> Vec<FieldDef> {
        let index = ["row", "col"]
            .into_iter()
            .filter(|_| self.include_cell_index)
            .map(|name| FieldDef {
                name: name.to_string(),
                field_type: FieldType::Int64,
            });
        let values = self.value_fields.iter().map(|name| FieldDef {
            name: name.clone(),
            field_type: FieldType::Float64,
        });
        index.chain(values).collect()
    }
}

/// `names` with repeats of each other or of `reserved` renamed by
/// appending `_2`, `_3`, ...
pub(crate) fn unique_field_names(names: &[String], reserved: &[&str]) -> Vec<String> {
    let mut taken: HashSet<String> = reserved.iter().map(|s| s.to_string()).collect();
    names
        .iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 2;
            while taken.contains(&candidate) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            taken.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// One output point.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPointRecord {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    /// One entry per value field; `None` is written as null.
    pub values: Vec<Option<f64>>,
}

/// Format-specific writer behind a [`DatasetHandle`].
trait PointWriter {
    fn write(&mut self, record: &OutputPointRecord) -> Result<(), EmitError>;

    fn flush(&mut self) -> Result<(), EmitError> {
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), EmitError>;

    /// Every file this writer creates.
    fn files(&self) -> Vec<PathBuf>;
}

/// Summary of an ended dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub path: PathBuf,
    pub records: u64,
}

/// Open output dataset.
pub struct DatasetHandle {
    path: PathBuf,
    schema_width: usize,
    writer: Option<Box<dyn PointWriter>>,
    files: Vec<PathBuf>,
    batch_size: usize,
    pending: usize,
    records: u64,
}

impl DatasetHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn write_record(&mut self, record: &OutputPointRecord) -> Result<(), EmitError> {
        if record.values.len() != self.schema_width {
            return Err(EmitError::SchemaMismatch {
                expected: self.schema_width,
                found: record.values.len(),
            });
        }
        let writer = self.writer.as_mut().ok_or(EmitError::Closed)?;
        writer.write(record)?;
        self.records += 1;
        self.pending += 1;
        if self.pending >= self.batch_size {
            writer.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    /// Flush and close the dataset.
    pub fn end_dataset(mut self) -> Result<DatasetSummary, EmitError> {
        let writer = self.writer.take().ok_or(EmitError::Closed)?;
        writer.finish()?;
        debug!(path = %self.path.display(), records = self.records, "Ended dataset");
        Ok(DatasetSummary {
            path: self.path.clone(),
            records: self.records,
        })
    }

    /// Close the dataset and delete everything written so far.
    pub fn abandon(mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                debug!(path = %self.path.display(), error = %e, "Error closing abandoned dataset");
            }
        }
        for file in &self.files {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %file.display(), error = %e, "Failed to remove partial output"),
            }
        }
        debug!(path = %self.path.display(), "Abandoned dataset");
    }
}

impl Drop for DatasetHandle {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                warn!(path = %self.path.display(), error = %e, "Failed to close dataset");
            }
        }
    }
}

/// Create a dataset at `path`, replacing any existing file.
pub fn begin_dataset(
    path: &Path,
    format: OutputFormat,
    schema: &PointSchema,
    crs: &Crs,
    batch_size: usize,
) -> Result<DatasetHandle, EmitError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| EmitError::io(parent, e))?;
        }
    }

    let writer: Box<dyn PointWriter> = match format {
        OutputFormat::Geojson => Box::new(geojson::GeoJsonWriter::create(path, schema, crs)?),
        OutputFormat::Csv => Box::new(delimited::CsvPointWriter::create(path, schema)?),
        OutputFormat::Shapefile => Box::new(esri::ShapefileWriter::create(path, schema, crs)?),
    };
    debug!(path = %path.display(), format = %format, fields = schema.fields().len(), "Began dataset");

    Ok(DatasetHandle {
        path: path.to_path_buf(),
        schema_width: schema.value_fields().len(),
        files: writer.files(),
        writer: Some(writer),
        batch_size: batch_size.max(1),
        pending: 0,
        records: 0,
    })
}

/// Reject NaN and infinities, which no output format can represent.
fn check_finite(field: &str, value: f64) -> Result<f64, EmitError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EmitError::encoding(field, value, "value is not finite"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(values: Vec<Option<f64>>) -> OutputPointRecord {
        OutputPointRecord {
            row: 0,
            col: 1,
            x: 1.5,
            y: -0.5,
            values,
        }
    }

    #[test]
    fn test_schema_fields_order() {
        let schema = PointSchema::new(vec!["a".into(), "b".into()], true);
        let names: Vec<String> = schema.fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["row", "col", "a", "b"]);
        assert_eq!(schema.fields()[0].field_type, FieldType::Int64);
        assert_eq!(PointSchema::new(vec!["v".into()], false).fields().len(), 1);
    }

    #[test]
    fn test_schema_keeps_index_names_distinct() {
        let labels = vec!["row".to_string(), "col".to_string(), "a".to_string(), "a".to_string()];
        let indexed = PointSchema::new(labels.clone(), true);
        let names: Vec<String> = indexed.fields().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["row", "col", "row_2", "col_2", "a", "a_2"]);

        let plain = PointSchema::new(labels, false);
        assert_eq!(plain.value_fields(), ["row", "col", "a", "a_2"]);
    }

    #[test]
    fn test_schema_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let schema = PointSchema::new(vec!["value".into()], false);
        let mut handle = begin_dataset(
            &dir.path().join("p.csv"),
            OutputFormat::Csv,
            &schema,
            &Crs::wgs84(),
            10,
        )
        .unwrap();
        let err = handle.write_record(&record(vec![Some(1.0), Some(2.0)])).unwrap_err();
        assert!(matches!(err, EmitError::SchemaMismatch { expected: 1, found: 2 }));
    }

    #[test]
    fn test_abandon_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let schema = PointSchema::new(vec!["value".into()], false);
        let path = dir.path().join("p.shp");
        let mut handle =
            begin_dataset(&path, OutputFormat::Shapefile, &schema, &Crs::wgs84(), 10).unwrap();
        handle.write_record(&record(vec![Some(1.0)])).unwrap();
        handle.abandon();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_closes_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let schema = PointSchema::new(vec!["value".into()], false);
        let path = dir.path().join("p.geojson");
        {
            let mut handle =
                begin_dataset(&path, OutputFormat::Geojson, &schema, &Crs::wgs84(), 1).unwrap();
            handle.write_record(&record(vec![Some(2.0)])).unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["features"].as_array().unwrap().len(), 1);
    }
}
