//! Fixture writers for grid-to-point tests.
//!
//! Everything is written into a caller-provided directory, normally a
//! [`tempfile::TempDir`], so tests never depend on checked-in data.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

/// ESRI `.prj` text for WGS84 geographic.
pub const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// ESRI `.prj` text for NAD83 geographic, as shipped with PRISM grids.
pub const NAD83_PRJ: &str = r#"GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// ESRI `.prj` text for NAD83 / Conus Albers.
pub const CONUS_ALBERS_PRJ: &str = r#"PROJCS["NAD_1983_Contiguous_USA_Albers",GEOGCS["GCS_North_American_1983",DATUM["D_North_American_1983",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Albers"],PARAMETER["False_Easting",0.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",-96.0],PARAMETER["Standard_Parallel_1",29.5],PARAMETER["Standard_Parallel_2",45.5],PARAMETER["Latitude_Of_Origin",23.0],UNIT["Meter",1.0]]"#;

/// An ESRI ASCII grid described in memory.
///
/// `values` are row-major with row 0 at the top (north) edge, which is the
/// order the format stores them in.
#[derive(Debug, Clone)]
pub struct AsciiGrid {
    pub ncols: usize,
    pub nrows: usize,
    pub xll: f64,
    pub yll: f64,
    pub cellsize: f64,
    pub nodata: Option<f64>,
    /// Write `xllcenter`/`yllcenter` instead of the corner keys.
    pub center_registered: bool,
    pub values: Vec<f64>,
}

impl AsciiGrid {
    /// A grid with lower-left corner `(xll, yll)` and no nodata sentinel.
    pub fn new(ncols: usize, nrows: usize, xll: f64, yll: f64, cellsize: f64, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), ncols * nrows, "values must fill the grid");
        Self {
            ncols,
            nrows,
            xll,
            yll,
            cellsize,
            nodata: None,
            center_registered: false,
            values,
        }
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn center_registered(mut self) -> Self {
        self.center_registered = true;
        self
    }

    /// Render the grid in ESRI ASCII format.
    pub fn render(&self) -> String {
        let (xkey, ykey) = if self.center_registered {
            ("xllcenter", "yllcenter")
        } else {
            ("xllcorner", "yllcorner")
        };
        let mut out = format!(
            "ncols {}\nnrows {}\n{} {}\n{} {}\ncellsize {}\n",
            self.ncols, self.nrows, xkey, self.xll, ykey, self.yll, self.cellsize
        );
        if let Some(nodata) = self.nodata {
            out.push_str(&format!("NODATA_value {}\n", nodata));
        }
        for row in self.values.chunks(self.ncols) {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }

    /// Write `<dir>/<name>` and return its path.
    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        write_text(dir, name, &self.render())
    }

    /// Write `<dir>/<name>` gzip-compressed.
    pub fn write_gz(&self, dir: &Path, name: &str) -> PathBuf {
        write_gzip(dir, name, self.render().as_bytes())
    }
}

/// Write a text file and return its path.
pub fn write_text(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("failed to write fixture");
    path
}

/// Write a gzip-compressed file and return its path.
pub fn write_gzip(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let file = fs::File::create(&path).expect("failed to create gzip fixture");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(contents).expect("failed to write gzip fixture");
    encoder.finish().expect("failed to finish gzip fixture");
    path
}

/// Gzip-compress bytes in memory.
pub fn gzip_bytes(contents: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(contents).expect("failed to compress fixture");
    encoder.finish().expect("failed to finish gzip fixture")
}

/// SNODAS cell data: big-endian 16-bit integers, gzip-compressed.
pub fn snodas_cells(values: &[i16]) -> Vec<u8> {
    let raw: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
    gzip_bytes(&raw)
}

/// SNODAS `.txt` description of a small grid, gzip-compressed.
pub fn snodas_description(cols: usize, rows: usize, min_x: f64, max_y: f64, cell_size: f64) -> Vec<u8> {
    let text = format!(
        "Description: test grid\n\
         Data units: Meters / 1000.000000\n\
         Number of columns: {cols}\n\
         Number of rows: {rows}\n\
         Minimum x-axis coordinate: {min_x}\n\
         Maximum y-axis coordinate: {max_y}\n\
         X-axis resolution: {cell_size}\n\
         Y-axis resolution: {cell_size}\n\
         No data value: -9999\n\
         Data bytes per pixel: 2\n"
    );
    gzip_bytes(text.as_bytes())
}

/// Write the `.prj` sidecar next to `grid_path`.
pub fn write_prj(grid_path: &Path, wkt: &str) -> PathBuf {
    let path = sidecar_path(grid_path, "prj");
    fs::write(&path, wkt).expect("failed to write prj sidecar");
    path
}

/// Write an ESRI world file (`.wld`) next to `grid_path`.
///
/// Lines are A, D, B, E, C, F where C/F locate the centre of the
/// upper-left cell.
pub fn write_world_file(grid_path: &Path, params: [f64; 6]) -> PathBuf {
    let path = sidecar_path(grid_path, "wld");
    let text: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    fs::write(&path, text.join("\n") + "\n").expect("failed to write world file");
    path
}

/// `dir/name.asc` -> `dir/name.<ext>`; `.asc.gz` loses both extensions.
pub fn sidecar_path(grid_path: &Path, ext: &str) -> PathBuf {
    let name = grid_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".gz")
        .unwrap_or(name)
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name);
    grid_path.with_file_name(format!("{}.{}", stem, ext))
}

/// Write a tar archive with the given `(entry name, contents)` pairs.
pub fn write_tar(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let file = fs::File::create(&path).expect("failed to create tar fixture");
    let mut builder = tar::Builder::new(file);
    for (entry_name, contents) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, entry_name, *contents)
            .expect("failed to append tar entry");
    }
    builder.finish().expect("failed to finish tar fixture");
    path
}

/// Write a PRISM-style time series into `dir`.
///
/// Each date (`YYYYMMDD`) becomes
/// `PRISM_<variable>_stable_4kmD2_<date>_bil.asc` with a NAD83 `.prj`.
/// Grid `i` is offset by `i * 10` so timesteps are distinguishable.
pub fn write_prism_series(dir: &Path, variable: &str, dates: &[&str], grid: &AsciiGrid) -> Vec<PathBuf> {
    dates
        .iter()
        .enumerate()
        .map(|(i, date)| {
            let mut layer = grid.clone();
            let offset = i as f64 * 10.0;
            for v in layer.values.iter_mut() {
                if Some(*v) != layer.nodata {
                    *v += offset;
                }
            }
            let name = format!("PRISM_{}_stable_4kmD2_{}_bil.asc", variable, date);
            let path = layer.write(dir, &name);
            write_prj(&path, NAD83_PRJ);
            path
        })
        .collect()
}

/// The 2x2 WGS84 grid used throughout the conversion tests.
///
/// Lower-left corner (0, 0), 1-degree cells, values `[[1, 2], [3, 4]]`
/// from the north row down, nodata `-9999`.
pub fn two_by_two() -> AsciiGrid {
    AsciiGrid::new(2, 2, 0.0, 0.0, 1.0, vec![1.0, 2.0, 3.0, 4.0]).with_nodata(-9999.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_ascii_grid() {
        let text = two_by_two().render();
        assert!(text.starts_with("ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n"));
        assert!(text.contains("NODATA_value -9999\n"));
        assert!(text.ends_with("1 2\n3 4\n"));
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(sidecar_path(Path::new("/a/b.asc"), "prj"), PathBuf::from("/a/b.prj"));
        assert_eq!(sidecar_path(Path::new("/a/b.asc.gz"), "prj"), PathBuf::from("/a/b.prj"));
    }

    #[test]
    fn test_prism_series_names() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_prism_series(dir.path(), "ppt", &["20240101", "20240102"], &two_by_two());
        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("PRISM_ppt_stable_4kmD2_20240102_bil.asc"));
        assert!(dir.path().join("PRISM_ppt_stable_4kmD2_20240101_bil.prj").exists());
    }
}
