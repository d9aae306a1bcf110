//! Streaming GeoJSON `FeatureCollection` writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use projection::Crs;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use super::{check_finite, OutputPointRecord, PointSchema, PointWriter};
use crate::error::EmitError;

pub(super) struct GeoJsonWriter {
    path: PathBuf,
    out: BufWriter<File>,
    fields: Vec<String>,
    include_cell_index: bool,
    written: u64,
}

impl GeoJsonWriter {
    pub(super) fn create(path: &Path, schema: &PointSchema, crs: &Crs) -> Result<Self, EmitError> {
        let file = File::create(path).map_err(|e| EmitError::io(path, e))?;
        let mut out = BufWriter::new(file);

        out.write_all(br#"{"type":"FeatureCollection","#)
            .map_err(|e| EmitError::io(path, e))?;
        if let Some(name) = crs_member(crs) {
            let member = serde_json::to_string(&NamedCrs {
                kind: "name",
                properties: CrsName { name: &name },
            })?;
            write!(out, "\"crs\":{},", member).map_err(|e| EmitError::io(path, e))?;
        }
        out.write_all(br#""features":["#)
            .map_err(|e| EmitError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            out,
            fields: schema.value_fields().to_vec(),
            include_cell_index: schema.include_cell_index(),
            written: 0,
        })
    }
}

/// Legacy named-CRS member; omitted for EPSG:4326, the GeoJSON default.
fn crs_member(crs: &Crs) -> Option<String> {
    match crs.epsg_code() {
        Some(4326) => None,
        Some(code) => Some(format!("urn:ogc:def:crs:EPSG::{}", code)),
        None => Some(crs.name().to_string()),
    }
}

#[derive(Serialize)]
struct NamedCrs<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: CrsName<'a>,
}

#[derive(Serialize)]
struct CrsName<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct PointGeometry {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: [f64; 2],
}

struct Properties<'a> {
    writer: &'a GeoJsonWriter,
    record: &'a OutputPointRecord,
}

impl Serialize for Properties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if self.writer.include_cell_index {
            map.serialize_entry("row", &self.record.row)?;
            map.serialize_entry("col", &self.record.col)?;
        }
        for (name, value) in self.writer.fields.iter().zip(&self.record.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    geometry: PointGeometry,
    properties: Properties<'a>,
}

impl PointWriter for GeoJsonWriter {
    fn write(&mut self, record: &OutputPointRecord) -> Result<(), EmitError> {
        let x = check_finite("x", record.x)?;
        let y = check_finite("y", record.y)?;
        for (name, value) in self.fields.iter().zip(&record.values) {
            if let Some(v) = value {
                check_finite(name, *v)?;
            }
        }

        let feature = serde_json::to_vec(&Feature {
            kind: "Feature",
            geometry: PointGeometry {
                kind: "Point",
                coordinates: [x, y],
            },
            properties: Properties {
                writer: self,
                record,
            },
        })?;

        let separator: &[u8] = if self.written == 0 { b"\n" } else { b",\n" };
        self.out
            .write_all(separator)
            .and_then(|_| self.out.write_all(&feature))
            .map_err(|e| EmitError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EmitError> {
        self.out.flush().map_err(|e| EmitError::io(&self.path, e))
    }

    fn finish(mut self: Box<Self>) -> Result<(), EmitError> {
        let tail: &[u8] = if self.written == 0 { b"]}\n" } else { b"\n]}\n" };
        self.out
            .write_all(tail)
            .and_then(|_| self.out.flush())
            .map_err(|e| EmitError::io(&self.path, e))
    }

    fn files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_points(crs: &Crs, records: &[OutputPointRecord], schema: &PointSchema) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.geojson");
        let mut writer = Box::new(GeoJsonWriter::create(&path, schema, crs).unwrap());
        for r in records {
            writer.write(r).unwrap();
        }
        writer.finish().unwrap();
        std::fs::read_to_string(&path).unwrap()
    }

    fn point(values: Vec<Option<f64>>) -> OutputPointRecord {
        OutputPointRecord {
            row: 1,
            col: 0,
            x: 0.5,
            y: -1.5,
            values,
        }
    }

    #[test]
    fn test_feature_collection() {
        let schema = PointSchema::new(vec!["2017-01-01".into(), "2017-01-02".into()], true);
        let text = write_points(&Crs::wgs84(), &[point(vec![Some(3.0), None])], &schema);
        assert!(!text.contains("\"crs\""));
        assert!(text.contains(
            r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[0.5,-1.5]},"properties":{"row":1,"col":0,"2017-01-01":3.0,"2017-01-02":null}}"#
        ));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
    }

    #[test]
    fn test_value_fields_do_not_shadow_cell_index() {
        let schema = PointSchema::new(vec!["row".into(), "value".into()], true);
        let text = write_points(&Crs::wgs84(), &[point(vec![Some(7.0), Some(8.0)])], &schema);
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let properties = &json["features"][0]["properties"];
        assert_eq!(properties["row"], 1);
        assert_eq!(properties["col"], 0);
        assert_eq!(properties["row_2"], 7.0);
        assert_eq!(properties["value"], 8.0);
        assert!(text.contains(r#""properties":{"row":1,"col":0,"row_2":7.0,"value":8.0}"#));
    }

    #[test]
    fn test_crs_member_for_projected() {
        let schema = PointSchema::new(vec!["value".into()], false);
        let text = write_points(&Crs::parse("EPSG:3857").unwrap(), &[], &schema);
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["crs"]["properties"]["name"], "urn:ogc:def:crs:EPSG::3857");
        assert_eq!(json["features"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_non_finite_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let schema = PointSchema::new(vec!["value".into()], false);
        let path = dir.path().join("bad.geojson");
        let mut writer = GeoJsonWriter::create(&path, &schema, &Crs::wgs84()).unwrap();
        let err = writer.write(&point(vec![Some(f64::INFINITY)])).unwrap_err();
        assert!(matches!(err, EmitError::Encoding { .. }));
    }
}
