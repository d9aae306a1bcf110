//! ESRI ASCII grid (`.asc`) parsing.
//!
//! ```text
//! ncols         4
//! nrows         2
//! xllcorner     -125.0
//! yllcorner     24.0
//! cellsize      0.0416666
//! NODATA_value  -9999
//! 1.0 2.0 3.0 4.0
//! 5.0 6.0 7.0 8.0
//! ```
//!
//! Rows are stored top (north) first. `xllcenter`/`yllcenter` may replace
//! the corner keys and `dx`/`dy` may replace `cellsize`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::{Result, SourceError};
use crate::geometry::GridGeometry;

/// Nodata value when the header has none.
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Cells reserved up front when reading values; larger grids grow as read.
const MAX_PREALLOCATED_CELLS: usize = 1 << 24;

pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

const HEADER_KEYS: &[&str] = &[
    "ncols",
    "nrows",
    "xllcorner",
    "xllcenter",
    "yllcorner",
    "yllcenter",
    "cellsize",
    "dx",
    "dy",
    "nodata_value",
];

/// Parsed ESRI ASCII header.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiHeader {
    pub ncols: usize,
    pub nrows: usize,
    /// X of the lower-left corner of the lower-left cell
    pub x_corner: f64,
    /// Y of the lower-left corner of the lower-left cell
    pub y_corner: f64,
    pub dx: f64,
    pub dy: f64,
    pub nodata: f64,
}

impl AsciiHeader {
    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::lower_left(
            self.x_corner,
            self.y_corner,
            self.dx,
            self.dy,
            self.nrows,
            self.ncols,
        )
    }

    fn from_fields(fields: &HashMap<String, f64>, name: &str) -> Result<Self> {
        let get = |key: &str| fields.get(key).copied();
        let count = |key: &str| -> Result<usize> {
            let v = get(key).ok_or_else(|| SourceError::header(name, format!("missing {}", key)))?;
            if v < 1.0 || v.fract() != 0.0 {
                return Err(SourceError::header(name, format!("{} must be a positive integer, got {}", key, v)));
            }
            if v > u32::MAX as f64 {
                return Err(SourceError::header(name, format!("{} is too large: {}", key, v)));
            }
            Ok(v as usize)
        };

        let ncols = count("ncols")?;
        let nrows = count("nrows")?;
        if ncols.checked_mul(nrows).is_none() {
            return Err(SourceError::header(
                name,
                format!("{}x{} grid has too many cells", nrows, ncols),
            ));
        }

        let (dx, dy) = match (get("cellsize"), get("dx"), get("dy")) {
            (Some(size), _, _) => (size, size),
            (None, Some(dx), Some(dy)) => (dx, dy),
            _ => return Err(SourceError::header(name, "missing cellsize")),
        };
        if !(dx > 0.0 && dy > 0.0 && dx.is_finite() && dy.is_finite()) {
            return Err(SourceError::header(name, "cell size must be positive"));
        }

        let x_corner = match (get("xllcorner"), get("xllcenter")) {
            (Some(x), _) => x,
            (None, Some(x)) => x - dx / 2.0,
            _ => return Err(SourceError::header(name, "missing xllcorner/xllcenter")),
        };
        let y_corner = match (get("yllcorner"), get("yllcenter")) {
            (Some(y), _) => y,
            (None, Some(y)) => y - dy / 2.0,
            _ => return Err(SourceError::header(name, "missing yllcorner/yllcenter")),
        };

        Ok(Self {
            ncols,
            nrows,
            x_corner,
            y_corner,
            dx,
            dy,
            nodata: get("nodata_value").unwrap_or(DEFAULT_NODATA),
        })
    }
}

/// A fully parsed grid: header plus row-major values.
#[derive(Debug, Clone)]
pub struct AsciiGrid {
    pub header: AsciiHeader,
    pub values: Vec<f64>,
}

/// Open a grid file, transparently decompressing gzip content.
pub fn open_grid_file(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let gz = reader
        .fill_buf()
        .map_err(|e| SourceError::io(path, e))?
        .starts_with(&GZIP_MAGIC);
    if gz {
        Ok(Box::new(BufReader::new(GzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

/// Wrap in-memory grid bytes, decompressing gzip content.
pub fn grid_bytes_reader(bytes: &[u8]) -> Box<dyn BufRead + '_> {
    if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(BufReader::new(GzDecoder::new(bytes)))
    } else {
        Box::new(bytes)
    }
}

/// True when the first token of the stream is `ncols` or `nrows`.
pub fn looks_like_ascii_grid<R: BufRead>(mut reader: R) -> bool {
    let mut line = String::new();
    for _ in 0..8 {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => return false,
            Ok(_) => {}
        }
        if let Some(token) = line.split_whitespace().next() {
            return token.eq_ignore_ascii_case("ncols") || token.eq_ignore_ascii_case("nrows");
        }
    }
    false
}

/// Read only the header.
pub fn read_header<R: BufRead>(mut reader: R, name: &str) -> Result<AsciiHeader> {
    parse_header(&mut reader, name).map(|(header, _)| header)
}

/// Read the header and the full cell matrix.
pub fn read_grid<R: BufRead>(mut reader: R, name: &str) -> Result<AsciiGrid> {
    let (header, first_line) = parse_header(&mut reader, name)?;
    let expected = header
        .ncols
        .checked_mul(header.nrows)
        .ok_or_else(|| SourceError::header(name, "grid has too many cells"))?;
    let mut values = Vec::with_capacity(expected.min(MAX_PREALLOCATED_CELLS));

    let push_tokens = |line: &str, values: &mut Vec<f64>| -> Result<()> {
        for token in line.split_whitespace() {
            if values.len() == expected {
                return Err(SourceError::data(
                    name,
                    format!("more than {} values for a {}x{} grid", expected, header.nrows, header.ncols),
                ));
            }
            let value = token
                .parse::<f64>()
                .map_err(|_| SourceError::data(name, format!("invalid value '{}' at cell {}", token, values.len())))?;
            values.push(value);
        }
        Ok(())
    };

    if let Some(line) = first_line {
        push_tokens(&line, &mut values)?;
    }
    for line in reader.lines() {
        let line = line.map_err(|e| SourceError::data(name, format!("read failed: {}", e)))?;
        push_tokens(&line, &mut values)?;
    }

    if values.len() != expected {
        return Err(SourceError::data(
            name,
            format!("expected {} values, found {}", expected, values.len()),
        ));
    }

    Ok(AsciiGrid { header, values })
}

/// Parse header lines; returns the header and the first data line, if any.
fn parse_header<R: BufRead>(reader: &mut R, name: &str) -> Result<(AsciiHeader, Option<String>)> {
    let mut fields = HashMap::new();
    let mut line = String::new();

    let first_data = loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| SourceError::header(name, format!("read failed: {}", e)))?;
        if n == 0 {
            break None;
        }
        let mut parts = line.split_whitespace();
        let Some(key) = parts.next() else {
            continue;
        };
        let key = key.to_ascii_lowercase();
        if !HEADER_KEYS.contains(&key.as_str()) {
            break Some(line.clone());
        }
        let value = parts
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| SourceError::header(name, format!("invalid value for {}", key)))?;
        fields.insert(key, value);
    };

    let header = AsciiHeader::from_fields(&fields, name)?;
    Ok((header, first_data))
}
