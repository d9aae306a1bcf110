//! CSV point writer: `x,y[,row,col],<fields>`, nulls as empty fields.

use std::fs::File;
use std::path::{Path, PathBuf};

use super::{check_finite, unique_field_names, OutputPointRecord, PointSchema, PointWriter};
use crate::error::EmitError;

pub(super) struct CsvPointWriter {
    path: PathBuf,
    out: csv::Writer<File>,
    fields: Vec<String>,
    include_cell_index: bool,
    row: Vec<String>,
}

impl CsvPointWriter {
    pub(super) fn create(path: &Path, schema: &PointSchema) -> Result<Self, EmitError> {
        let file = File::create(path).map_err(|e| EmitError::io(path, e))?;
        let mut out = csv::Writer::from_writer(file);

        let mut header = vec!["x".to_string(), "y".to_string()];
        if schema.include_cell_index() {
            header.extend(["row".to_string(), "col".to_string()]);
        }
        let reserved: Vec<&str> = header.iter().map(String::as_str).collect();
        let fields = unique_field_names(schema.value_fields(), &reserved);
        header.extend(fields.iter().cloned());
        out.write_record(&header)?;

        Ok(Self {
            path: path.to_path_buf(),
            out,
            fields,
            include_cell_index: schema.include_cell_index(),
            row: Vec::with_capacity(header.len()),
        })
    }
}

impl PointWriter for CsvPointWriter {
    fn write(&mut self, record: &OutputPointRecord) -> Result<(), EmitError> {
        self.row.clear();
        self.row.push(check_finite("x", record.x)?.to_string());
        self.row.push(check_finite("y", record.y)?.to_string());
        if self.include_cell_index {
            self.row.push(record.row.to_string());
            self.row.push(record.col.to_string());
        }
        for (name, value) in self.fields.iter().zip(&record.values) {
            let cell = match value {
                Some(v) => check_finite(name, *v)?.to_string(),
                None => String::new(),
            };
            self.row.push(cell);
        }
        self.out.write_record(&self.row)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EmitError> {
        self.out.flush().map_err(|e| EmitError::io(&self.path, e))
    }

    fn finish(mut self: Box<Self>) -> Result<(), EmitError> {
        self.out.flush().map_err(|e| EmitError::io(&self.path, e))
    }

    fn files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let schema = PointSchema::new(vec!["tmean".into(), "tmax".into()], true);
        let mut writer = Box::new(CsvPointWriter::create(&path, &schema).unwrap());
        writer
            .write(&OutputPointRecord {
                row: 0,
                col: 1,
                x: 1.5,
                y: -0.5,
                values: vec![Some(2.25), None],
            })
            .unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "x,y,row,col,tmean,tmax\n1.5,-0.5,0,1,2.25,\n");
    }

    #[test]
    fn test_csv_header_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clash.csv");
        let schema = PointSchema::new(vec!["x".into(), "row".into(), "col".into()], true);
        let writer = Box::new(CsvPointWriter::create(&path, &schema).unwrap());
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "x,y,row,col,x_2,row_2,col_2\n");
    }

    #[test]
    fn test_csv_rejects_nan() {
        let dir = tempfile::tempdir().unwrap();
        let schema = PointSchema::new(vec!["value".into()], false);
        let mut writer = CsvPointWriter::create(&dir.path().join("nan.csv"), &schema).unwrap();
        let err = writer
            .write(&OutputPointRecord {
                row: 0,
                col: 0,
                x: f64::NAN,
                y: 0.0,
                values: vec![Some(1.0)],
            })
            .unwrap_err();
        assert!(matches!(err, EmitError::Encoding { .. }));
    }
}
