//! SNODAS archives: the NOHRSC Snow Data Assimilation System daily tars.
//!
//! A daily archive holds one gzip-compressed flat binary grid per product,
//! named like `us_ssmv11034tS__T0001TTNATS2014010105HP001.dat.gz`, usually
//! next to a `.txt.gz` description. Characters 8..12 of the name are the
//! product code and 13..17 the data type, which splits precipitation into
//! its liquid (`lL00`) and solid (`lL01`) phases. The four digits before
//! `TTNATS` give the integration period in hours and the ten after it the
//! `YYYYMMDDHH` stamp.
//!
//! Cells are 16-bit signed integers, rows north first, big-endian unless an
//! ENVI header says otherwise. Values are stored scaled; each product has
//! its own divisor.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use projection::Crs;
use tar::{Archive, EntryType};
use tracing::debug;

use super::archive::{is_ustar, TarByteRange, TarFile};
use super::{make_labels_unique, OpenOptions};
use crate::ascii_grid::{grid_bytes_reader, AsciiGrid, AsciiHeader};
use crate::dataset::{DatasetParts, GridDataset, LayerInfo, LayerReader};
use crate::error::{Result, SourceError};

const NAME_PREFIX: &str = "us_ssmv";
const STAMP_MARKER: &str = "TTNATS";

/// Masked continental US grid, 30 arc-second cells.
const MASKED_COLS: usize = 6935;
const MASKED_ROWS: usize = 3351;
const CELL_SIZE: f64 = 1.0 / 120.0;
const NODATA: f64 = -9999.0;

/// Grid corner from October 2013 on.
const MASKED_MIN_X: f64 = -124.733_333_333_333_33;
const MASKED_MAX_Y: f64 = 52.875;
/// Grid corner before the October 2013 half-cell correction.
const LEGACY_MIN_X: f64 = -124.733_75;
const LEGACY_MAX_Y: f64 = 52.874_583_333_333_33;

/// Largest description file read into memory.
const MAX_DESCRIPTION_BYTES: u64 = 1 << 20;

const MAX_PREALLOCATED_BYTES: usize = 1 << 27;

/// One SNODAS product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnodasProduct {
    pub code: &'static str,
    /// Data-type field that must also match, when the code is shared
    pub data_type: Option<&'static str>,
    pub name: &'static str,
    pub units: &'static str,
    /// Stored integers are the value times this divisor
    pub divisor: f64,
}

pub const PRODUCTS: &[SnodasProduct] = &[
    SnodasProduct { code: "1034", data_type: None, name: "SWE", units: "m", divisor: 1000.0 },
    SnodasProduct { code: "1036", data_type: None, name: "Snow Depth", units: "m", divisor: 1000.0 },
    SnodasProduct {
        code: "1044",
        data_type: None,
        name: "Snow Melt Runoff at the Base of the Snow Pack",
        units: "m",
        divisor: 100_000.0,
    },
    SnodasProduct {
        code: "1050",
        data_type: None,
        name: "Sublimation from the Snow Pack",
        units: "m",
        divisor: 100_000.0,
    },
    SnodasProduct {
        code: "1039",
        data_type: None,
        name: "Sublimation of Blowing Snow",
        units: "m",
        divisor: 100_000.0,
    },
    SnodasProduct {
        code: "1025",
        data_type: Some("lL01"),
        name: "Solid Precipitation",
        units: "kg/m2",
        divisor: 10.0,
    },
    SnodasProduct {
        code: "1025",
        data_type: Some("lL00"),
        name: "Liquid Precipitation",
        units: "kg/m2",
        divisor: 10.0,
    },
    SnodasProduct {
        code: "1038",
        data_type: None,
        name: "Snow Pack Average Temperature",
        units: "K",
        divisor: 1.0,
    },
];

/// Product named by `selector`: its name (any case) or an unshared code.
pub fn select_product(selector: &str) -> Option<&'static SnodasProduct> {
    let selector = selector.trim();
    PRODUCTS.iter().find(|p| {
        p.name.eq_ignore_ascii_case(selector) || (p.data_type.is_none() && p.code == selector)
    })
}

/// Product of a grid entry, from its file name.
fn entry_product(base: &str) -> Option<&'static SnodasProduct> {
    if !base.starts_with(NAME_PREFIX) {
        return None;
    }
    let code = base.get(8..12)?;
    let data_type = base.get(13..17)?;
    PRODUCTS
        .iter()
        .find(|p| p.code == code && p.data_type.map_or(true, |t| t == data_type))
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Stem of a `.dat` / `.dat.gz` grid entry.
fn grid_stem(base: &str) -> Option<&str> {
    let lower = base.to_ascii_lowercase();
    let cut = if lower.ends_with(".dat.gz") {
        7
    } else if lower.ends_with(".dat") {
        4
    } else {
        return None;
    };
    base.get(..base.len() - cut)
}

/// Stem of a `.txt`, `.txt.gz` or `.hdr` description entry.
fn description_stem(base: &str) -> Option<&str> {
    let lower = base.to_ascii_lowercase();
    let cut = [".txt.gz", ".txt", ".hdr"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| ext.len())?;
    base.get(..base.len() - cut)
}

fn is_snodas_grid(name: &str) -> bool {
    let base = base_name(name);
    base.starts_with(NAME_PREFIX) && grid_stem(base).is_some()
}

/// Period covered by a grid: `(start, end)` from its name.
fn entry_period(stem: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let at = stem.find(STAMP_MARKER)?;
    let hours: i64 = stem.get(at.checked_sub(4)?..at)?.parse().ok()?;
    let stamp = stem.get(at + STAMP_MARKER.len()..at + STAMP_MARKER.len() + 10)?;
    if !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(&stamp[..8], "%Y%m%d").ok()?;
    let hour: u32 = stamp[8..].parse().ok()?;
    let end = Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0)?) + Duration::hours(1);
    Some((end - Duration::hours(hours), end))
}

pub(super) fn probe(path: &Path) -> bool {
    if !is_ustar(path) {
        return false;
    }
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut archive = Archive::new(file);
    let Ok(entries) = archive.entries_with_seek() else {
        return false;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.path().ok().map(|p| p.to_string_lossy().into_owned()))
        .any(|name| is_snodas_grid(&name))
}

/// Layout of a product grid.
#[derive(Debug, Clone, PartialEq)]
struct GridDescription {
    cols: usize,
    rows: usize,
    min_x: f64,
    max_y: f64,
    dx: f64,
    dy: f64,
    nodata: f64,
    big_endian: bool,
}

impl GridDescription {
    /// The masked continental grid, with the corner in use on `date`.
    fn masked(date: Option<DateTime<Utc>>) -> Self {
        let corrected = Utc.with_ymd_and_hms(2013, 10, 1, 0, 0, 0).single();
        let legacy = matches!((date, corrected), (Some(d), Some(c)) if d < c);
        let (min_x, max_y) = if legacy {
            (LEGACY_MIN_X, LEGACY_MAX_Y)
        } else {
            (MASKED_MIN_X, MASKED_MAX_Y)
        };
        Self {
            cols: MASKED_COLS,
            rows: MASKED_ROWS,
            min_x,
            max_y,
            dx: CELL_SIZE,
            dy: CELL_SIZE,
            nodata: NODATA,
            big_endian: true,
        }
    }

    /// Apply a `.txt` (`key: value`) or ENVI `.hdr` (`key = value`)
    /// description on top of the masked defaults.
    fn parse(mut self, text: &str, name: &str) -> Result<Self> {
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('=')) else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            let number = || {
                value
                    .parse::<f64>()
                    .map_err(|_| SourceError::header(name, format!("{} is not a number: {}", key, value)))
            };
            let count = || -> Result<usize> {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0 && *n <= u32::MAX as usize)
                    .ok_or_else(|| SourceError::header(name, format!("{} must be a positive integer, got {}", key, value)))
            };
            match key.as_str() {
                "number of columns" | "samples" => self.cols = count()?,
                "number of rows" | "lines" => self.rows = count()?,
                "minimum x-axis coordinate" => self.min_x = number()?,
                "maximum y-axis coordinate" => self.max_y = number()?,
                "x-axis resolution" => self.dx = number()?,
                "y-axis resolution" => self.dy = number()?,
                "no data value" => self.nodata = number()?,
                "byte order" => self.big_endian = value != "0",
                "data bytes per pixel" | "data type" if value != "2" => {
                    return Err(SourceError::header(name, format!("unsupported {}: {}", key, value)));
                }
                _ => {}
            }
        }
        if !(self.dx > 0.0 && self.dy > 0.0 && self.dx.is_finite() && self.dy.is_finite()) {
            return Err(SourceError::header(name, "cell size must be positive"));
        }
        if self.cols.checked_mul(self.rows).and_then(|n| n.checked_mul(2)).is_none() {
            return Err(SourceError::header(name, "grid has too many cells"));
        }
        Ok(self)
    }

    fn header(&self) -> AsciiHeader {
        AsciiHeader {
            ncols: self.cols,
            nrows: self.rows,
            x_corner: self.min_x,
            y_corner: self.max_y - self.rows as f64 * self.dy,
            dx: self.dx,
            dy: self.dy,
            nodata: self.nodata,
        }
    }
}

struct SnodasLayer {
    range: TarByteRange,
    description: GridDescription,
}

pub(super) fn open(path: &Path, options: &OpenOptions) -> Result<GridDataset> {
    let io_err = |e| SourceError::io(path, e);
    let file = File::open(path).map_err(io_err)?;
    let mut archive = Archive::new(file);

    let mut grids: Vec<(TarByteRange, &'static SnodasProduct)> = Vec::new();
    let mut descriptions: HashMap<String, TarByteRange> = HashMap::new();
    for entry in archive.entries_with_seek().map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let name = entry.path().map_err(io_err)?.to_string_lossy().into_owned();
        let range = TarByteRange {
            offset: entry.raw_file_position(),
            length: entry.size(),
            name,
        };
        let base = base_name(&range.name);
        if let Some(product) = entry_product(base).filter(|_| grid_stem(base).is_some()) {
            grids.push((range, product));
        } else if let Some(stem) = description_stem(base) {
            if range.length <= MAX_DESCRIPTION_BYTES {
                descriptions.insert(stem.to_string(), range);
            }
        }
    }

    let product = choose_product(path, options.variable.as_deref(), &grids)?;
    let mut tar = TarFile::open(path)?;
    let mut layers = Vec::new();
    for (range, _) in grids.into_iter().filter(|(_, p)| *p == product) {
        let base = base_name(&range.name);
        let stem = grid_stem(base).unwrap_or(base).to_string();
        let period = entry_period(&stem);
        let mut description = GridDescription::masked(period.map(|(start, _)| start));
        if let Some(text_range) = descriptions.get(&stem) {
            let bytes = tar.entry_bytes(text_range)?;
            let mut text = String::new();
            grid_bytes_reader(&bytes)
                .take(MAX_DESCRIPTION_BYTES)
                .read_to_string(&mut text)
                .map_err(|e| SourceError::io(path, e))?;
            description = description.parse(&text, &text_range.name)?;
        }
        let info = LayerInfo {
            label: period
                .map(|(_, end)| end.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| stem.clone()),
            timestamp: period.map(|(start, _)| start),
            end: period.map(|(_, end)| end),
            source_name: base.to_string(),
            variable: Some(product.name.to_string()),
            units: Some(product.units.to_string()),
        };
        layers.push((info, SnodasLayer { range, description }));
    }
    layers.sort_by(|(a, _), (b, _)| (a.timestamp, &a.source_name).cmp(&(b.timestamp, &b.source_name)));

    let (mut infos, layers): (Vec<LayerInfo>, Vec<SnodasLayer>) = layers.into_iter().unzip();
    make_labels_unique(&mut infos);
    let first = layers
        .first()
        .map(|l| l.description.clone())
        .ok_or_else(|| SourceError::Empty(path.to_path_buf()))?;
    debug!(product = product.name, layers = layers.len(), "Indexed SNODAS archive");

    let header = first.header();
    let crs = match &options.source_crs {
        Some(crs) => crs.clone(),
        None => Crs::wgs84(),
    };
    Ok(GridDataset::from_parts(DatasetParts {
        path: path.to_path_buf(),
        format: "snodas-tar",
        crs,
        geometry: header.geometry(),
        header_geometry: header.geometry(),
        nodata: header.nodata,
        layers: infos,
        reader: Box::new(SnodasReader {
            tar,
            layers,
            divisor: product.divisor,
        }),
    }))
}

/// The product to read: the selected one, or SWE when nothing is selected.
fn choose_product(
    path: &Path,
    variable: Option<&str>,
    grids: &[(TarByteRange, &'static SnodasProduct)],
) -> Result<&'static SnodasProduct> {
    let mut available: Vec<&'static SnodasProduct> = Vec::new();
    for (_, product) in grids {
        if !available.contains(product) {
            available.push(*product);
        }
    }
    if available.is_empty() {
        return Err(SourceError::Empty(path.to_path_buf()));
    }
    let wanted = variable.unwrap_or("SWE");
    select_product(wanted)
        .filter(|p| available.contains(p))
        .ok_or_else(|| SourceError::UnknownVariable {
            variable: wanted.to_string(),
            available: available.iter().map(|p| p.name.to_string()).collect(),
        })
}

struct SnodasReader {
    tar: TarFile,
    layers: Vec<SnodasLayer>,
    divisor: f64,
}

impl LayerReader for SnodasReader {
    fn read_layer(&mut self, index: usize) -> Result<AsciiGrid> {
        let layer = self.layers.get(index).ok_or(SourceError::Exhausted(index))?;
        let bytes = self.tar.entry_bytes(&layer.range)?;
        let values = decode_cells(&bytes, &layer.description, self.divisor, &layer.range.name)?;
        Ok(AsciiGrid {
            header: layer.description.header(),
            values,
        })
    }
}

/// Decode 16-bit cells, leaving nodata unscaled.
fn decode_cells(bytes: &[u8], description: &GridDescription, divisor: f64, name: &str) -> Result<Vec<f64>> {
    let expected = description.cols * description.rows * 2;
    let mut raw = Vec::with_capacity(expected.min(MAX_PREALLOCATED_BYTES));
    grid_bytes_reader(bytes)
        .take(expected as u64 + 1)
        .read_to_end(&mut raw)
        .map_err(|e| SourceError::data(name, format!("cannot decompress: {}", e)))?;
    if raw.len() != expected {
        let found = if raw.len() > expected { "more".to_string() } else { raw.len().to_string() };
        return Err(SourceError::data(
            name,
            format!(
                "{}x{} grid needs {} bytes of 16-bit cells, found {}",
                description.rows, description.cols, expected, found
            ),
        ));
    }
    Ok(raw
        .chunks_exact(2)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            let v = if description.big_endian {
                i16::from_be_bytes(pair)
            } else {
                i16::from_le_bytes(pair)
            } as f64;
            if v == description.nodata {
                v
            } else {
                v / divisor
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWE_NAME: &str = "us_ssmv11034tS__T0001TTNATS2014010105HP001.dat.gz";
    const LIQUID_NAME: &str = "us_ssmv01025SlL00T0024TTNATS2014010105DP001.dat.gz";
    const SOLID_NAME: &str = "us_ssmv01025SlL01T0024TTNATS2014010105DP001.dat.gz";

    #[test]
    fn test_entry_product_from_name() {
        assert_eq!(entry_product(SWE_NAME).map(|p| p.name), Some("SWE"));
        assert_eq!(entry_product(LIQUID_NAME).map(|p| p.name), Some("Liquid Precipitation"));
        assert_eq!(entry_product(SOLID_NAME).map(|p| p.name), Some("Solid Precipitation"));
        assert_eq!(entry_product("us_ssmv11099tS__T0001TTNATS2014010105HP001.dat.gz"), None);
        assert_eq!(entry_product("grid_20140101.dat.gz"), None);
    }

    #[test]
    fn test_select_product() {
        assert_eq!(select_product("snow depth").map(|p| p.code), Some("1036"));
        assert_eq!(select_product("1044").map(|p| p.units), Some("m"));
        // Shared code needs the phase
        assert_eq!(select_product("1025"), None);
        assert_eq!(select_product("Liquid Precipitation").map(|p| p.data_type), Some(Some("lL00")));
        assert_eq!(select_product("rain"), None);
    }

    #[test]
    fn test_entry_period() {
        let day = |h| Utc.with_ymd_and_hms(2014, 1, 1, h, 0, 0).unwrap();
        let (start, end) = entry_period(grid_stem(SWE_NAME).unwrap()).unwrap();
        assert_eq!((start, end), (day(5), day(6)));

        let (start, end) = entry_period(grid_stem(LIQUID_NAME).unwrap()).unwrap();
        assert_eq!(end, day(6));
        assert_eq!(end - start, Duration::hours(24));
        assert_eq!(entry_period("us_ssmv11034tS__noStamp"), None);
    }

    #[test]
    fn test_masked_corner_by_date() {
        let before = Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).single();
        let after = Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).single();
        assert_eq!(GridDescription::masked(before).min_x, LEGACY_MIN_X);
        assert_eq!(GridDescription::masked(after).max_y, MASKED_MAX_Y);
        let header = GridDescription::masked(after).header();
        assert_eq!((header.ncols, header.nrows), (6935, 3351));
        assert!((header.y_corner - 24.95).abs() < 1e-9);
    }

    #[test]
    fn test_parse_description() {
        let text = "Description: Modeled snow water equivalent\n\
                    Number of columns: 3\n\
                    Number of rows: 2\n\
                    Minimum x-axis coordinate: -100.0\n\
                    Maximum y-axis coordinate: 40.0\n\
                    X-axis resolution: 0.5\n\
                    Y-axis resolution: 0.25\n\
                    No data value: -9999\n\
                    Data bytes per pixel: 2\n";
        let d = GridDescription::masked(None).parse(text, "a.txt").unwrap();
        assert_eq!((d.cols, d.rows, d.min_x, d.max_y, d.dx, d.dy), (3, 2, -100.0, 40.0, 0.5, 0.25));
        assert!(d.big_endian);

        let envi = "ENVI\nsamples = 4\nlines = 1\ndata type = 2\nbyte order = 0\n";
        let d = GridDescription::masked(None).parse(envi, "a.hdr").unwrap();
        assert_eq!((d.cols, d.rows), (4, 1));
        assert!(!d.big_endian);

        let err = GridDescription::masked(None).parse("Data bytes per pixel: 4\n", "a.txt").unwrap_err();
        assert!(matches!(err, SourceError::InvalidHeader { .. }));
        assert!(GridDescription::masked(None).parse("Number of rows: -3\n", "a.txt").is_err());
    }

    #[test]
    fn test_decode_cells_scales_and_keeps_nodata() {
        let d = GridDescription {
            cols: 2,
            rows: 2,
            ..GridDescription::masked(None)
        };
        let bytes: Vec<u8> = [1500i16, -9999, 0, 32767].iter().flat_map(|v| v.to_be_bytes()).collect();
        let values = decode_cells(&bytes, &d, 1000.0, "swe.dat").unwrap();
        assert_eq!(values, vec![1.5, -9999.0, 0.0, 32.767]);

        let err = decode_cells(&bytes[..6], &d, 1000.0, "swe.dat").unwrap_err();
        assert!(matches!(err, SourceError::InvalidData { .. }));
    }
}
