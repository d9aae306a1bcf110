//! ESRI shapefile writer: point shapes plus a DBF attribute table and
//! `.prj` sidecar.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use projection::Crs;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriter, TableWriterBuilder};
use shapefile::ShapeWriter;

use super::{check_finite, OutputPointRecord, PointSchema, PointWriter};
use crate::error::EmitError;

/// DBF field names are limited to 10 characters.
const MAX_FIELD_NAME: usize = 10;

const VALUE_WIDTH: u8 = 18;
const VALUE_DECIMALS: u8 = 6;
const INDEX_WIDTH: u8 = 10;

pub(super) struct ShapefileWriter {
    path: PathBuf,
    shapes: ShapeWriter<BufWriter<File>>,
    table: TableWriter<DbfSink>,
    dbf: DbfSink,
    columns: Vec<String>,
    include_cell_index: bool,
}

/// Buffered `.dbf` file shared with the table writer, so the buffer can be
/// flushed and its error reported once the table is finalized.
#[derive(Clone)]
struct DbfSink(Rc<RefCell<BufWriter<File>>>);

impl Write for DbfSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

impl Seek for DbfSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.borrow_mut().seek(pos)
    }
}

impl ShapefileWriter {
    pub(super) fn create(path: &Path, schema: &PointSchema, crs: &Crs) -> Result<Self, EmitError> {
        let include_cell_index = schema.include_cell_index();
        let columns = shapefile_field_names(schema.value_fields(), include_cell_index);

        let mut table = TableWriterBuilder::new();
        if include_cell_index {
            table = table
                .add_numeric_field(field_name("ROW")?, INDEX_WIDTH, 0)
                .add_numeric_field(field_name("COL")?, INDEX_WIDTH, 0);
        }
        for column in &columns {
            table = table.add_numeric_field(field_name(column)?, VALUE_WIDTH, VALUE_DECIMALS);
        }

        let shapes = ShapeWriter::from_path(path)?;
        let dbf_path = path.with_extension("dbf");
        let file = File::create(&dbf_path).map_err(|e| EmitError::io(&dbf_path, e))?;
        let dbf = DbfSink(Rc::new(RefCell::new(BufWriter::new(file))));
        let table = table.build_with_dest(dbf.clone());

        let prj = path.with_extension("prj");
        fs::write(&prj, crs.to_esri_wkt()).map_err(|e| EmitError::io(&prj, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            shapes,
            table,
            dbf,
            columns,
            include_cell_index,
        })
    }
}

fn field_name(name: &str) -> Result<FieldName, EmitError> {
    FieldName::try_from(name).map_err(|e| EmitError::InvalidFieldName {
        name: name.to_string(),
        reason: format!("{:?}", e),
    })
}

/// Fit a numeric value into a fixed-width DBF field.
fn dbf_numeric(field: &str, value: f64, width: u8, decimals: u8) -> Result<FieldValue, EmitError> {
    let value = check_finite(field, value)?;
    let text = format!("{:.*}", decimals as usize, value);
    if text.len() > width as usize {
        return Err(EmitError::encoding(
            field,
            value,
            format!("needs {} characters, field width is {}", text.len(), width),
        ));
    }
    Ok(FieldValue::Numeric(Some(value)))
}

impl PointWriter for ShapefileWriter {
    fn write(&mut self, record: &OutputPointRecord) -> Result<(), EmitError> {
        let x = check_finite("x", record.x)?;
        let y = check_finite("y", record.y)?;

        let mut row = Record::default();
        if self.include_cell_index {
            row.insert(
                "ROW".to_string(),
                dbf_numeric("ROW", record.row as f64, INDEX_WIDTH, 0)?,
            );
            row.insert(
                "COL".to_string(),
                dbf_numeric("COL", record.col as f64, INDEX_WIDTH, 0)?,
            );
        }
        for (column, value) in self.columns.iter().zip(&record.values) {
            let field = match value {
                Some(v) => dbf_numeric(column, *v, VALUE_WIDTH, VALUE_DECIMALS)?,
                None => FieldValue::Numeric(None),
            };
            row.insert(column.clone(), field);
        }

        self.shapes.write_shape(&shapefile::Point::new(x, y))?;
        self.table
            .write_record(&row)
            .map_err(shapefile::Error::from)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), EmitError> {
        self.shapes.finalize()?;
        self.table.finalize().map_err(shapefile::Error::from)?;
        let dbf = self.path.with_extension("dbf");
        self.dbf.flush().map_err(|e| EmitError::io(&dbf, e))?;
        Ok(())
    }

    fn files(&self) -> Vec<PathBuf> {
        ["shp", "shx", "dbf", "prj"]
            .iter()
            .map(|ext| self.path.with_extension(ext))
            .collect()
    }
}

/// DBF column names for value fields: ASCII letters, digits and `_`, at
/// most 10 characters, never starting with a digit, unique ignoring case.
///
/// `ROW` and `COL` are reserved when the cell index is written.
pub fn shapefile_field_names(names: &[String], include_cell_index: bool) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::new();
    if include_cell_index {
        taken.insert("ROW".to_string());
        taken.insert("COL".to_string());
    }

    names
        .iter()
        .map(|name| {
            let mut base: String = name
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if base.is_empty() {
                base = "FIELD".to_string();
            }
            if base.starts_with(|c: char| c.is_ascii_digit()) {
                base.insert(0, 'F');
            }
            base.truncate(MAX_FIELD_NAME);

            let mut candidate = base.clone();
            let mut n = 2;
            while taken.contains(&candidate.to_uppercase()) {
                let suffix = format!("_{}", n);
                let keep = MAX_FIELD_NAME.saturating_sub(suffix.len()).min(base.len());
                candidate = format!("{}{}", &base[..keep], suffix);
                n += 1;
            }
            taken.insert(candidate.to_uppercase());
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(labels: &[&str], index: bool) -> Vec<String> {
        let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        shapefile_field_names(&labels, index)
    }

    #[test]
    fn test_field_names_sanitised() {
        assert_eq!(names(&["value"], false), vec!["value"]);
        assert_eq!(names(&["2017-01-01"], false), vec!["F20170101"]);
        assert_eq!(names(&["precipitation_total"], false), vec!["precipitat"]);
        assert_eq!(names(&["%%"], false), vec!["FIELD"]);
    }

    #[test]
    fn test_field_names_deduplicated() {
        assert_eq!(
            names(&["2021-01-01T06:00", "2021-01-01T12:00", "row"], true),
            vec!["F20210101T", "F2021010_2", "row_2"]
        );
    }

    #[test]
    fn test_dbf_width_overflow() {
        assert!(dbf_numeric("v", 12345.5, VALUE_WIDTH, VALUE_DECIMALS).is_ok());
        let err = dbf_numeric("v", 1.0e15, VALUE_WIDTH, VALUE_DECIMALS).unwrap_err();
        assert!(matches!(err, EmitError::Encoding { .. }));
        assert!(dbf_numeric("v", f64::NAN, VALUE_WIDTH, VALUE_DECIMALS).is_err());
    }

    #[test]
    fn test_writes_all_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.shp");
        let schema = PointSchema::new(vec!["2017-01-01".into()], true);
        let crs = Crs::parse("EPSG:5070").unwrap();
        let mut writer = Box::new(ShapefileWriter::create(&path, &schema, &crs).unwrap());
        writer
            .write(&OutputPointRecord {
                row: 0,
                col: 0,
                x: 1000.0,
                y: 2000.0,
                values: vec![Some(1.25)],
            })
            .unwrap();
        let files = writer.files();
        writer.finish().unwrap();

        for file in &files {
            assert!(file.exists(), "{} missing", file.display());
        }
        let prj = std::fs::read_to_string(path.with_extension("prj")).unwrap();
        assert!(prj.contains("NAD_1983_Contiguous_USA_Albers"));

        let points = shapefile::read_as::<_, shapefile::Point, shapefile::dbase::Record>(&path).unwrap();
        assert_eq!(points.len(), 1);
        let (point, record) = &points[0];
        assert_eq!((point.x, point.y), (1000.0, 2000.0));
        assert_eq!(record.get("F20170101"), Some(&FieldValue::Numeric(Some(1.25))));
    }

    #[test]
    fn test_finish_completes_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.shp");
        let schema = PointSchema::new(vec!["value".into()], false);
        let crs = Crs::parse("EPSG:4326").unwrap();
        let mut writer = Box::new(ShapefileWriter::create(&path, &schema, &crs).unwrap());
        for i in 0..3 {
            writer
                .write(&OutputPointRecord {
                    row: 0,
                    col: i,
                    x: i as f64,
                    y: -1.0,
                    values: vec![Some(i as f64)],
                })
                .unwrap();
        }
        writer.finish().unwrap();

        let dbf = std::fs::read(path.with_extension("dbf")).unwrap();
        assert_eq!(u32::from_le_bytes([dbf[4], dbf[5], dbf[6], dbf[7]]), 3);
        assert_eq!(dbf.last(), Some(&0x1A));
        // 100-byte header plus one 8-byte index entry per shape
        assert_eq!(std::fs::metadata(path.with_extension("shx")).unwrap().len(), 124);

        let points = shapefile::read_as::<_, shapefile::Point, shapefile::dbase::Record>(&path).unwrap();
        let xs: Vec<f64> = points.iter().map(|(p, _)| p.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_empty_dataset_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.shp");
        let schema = PointSchema::new(vec!["value".into()], true);
        let crs = Crs::parse("EPSG:4326").unwrap();
        let writer = Box::new(ShapefileWriter::create(&path, &schema, &crs).unwrap());
        writer.finish().unwrap();

        let dbf = std::fs::read(path.with_extension("dbf")).unwrap();
        assert_eq!(u32::from_le_bytes([dbf[4], dbf[5], dbf[6], dbf[7]]), 0);
        assert_eq!(dbf.last(), Some(&0x1A));
    }
}
