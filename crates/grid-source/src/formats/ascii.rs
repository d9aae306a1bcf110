//! Single ESRI ASCII grid file (optionally gzip-compressed): one layer.

use std::fs;
use std::path::{Path, PathBuf};

use super::{assemble, OpenOptions, Sidecars, WORLD_FILE_EXTENSIONS};
use crate::ascii_grid::{looks_like_ascii_grid, open_grid_file, read_grid, read_header, AsciiGrid};
use crate::dataset::{GridDataset, LayerReader};
use crate::error::{Result, SourceError};
use crate::metadata::file_stem;

pub(super) fn probe(path: &Path) -> bool {
    path.is_file()
        && open_grid_file(path)
            .map(looks_like_ascii_grid)
            .unwrap_or(false)
}

pub(super) fn open(path: &Path, options: &OpenOptions) -> Result<GridDataset> {
    let name = display_name(path);
    let header = read_header(open_grid_file(path)?, &name)?;
    let sidecars = file_sidecars(path)?;

    assemble(
        path,
        "esri-ascii",
        &[name],
        &header,
        sidecars,
        options,
        Box::new(FileReader {
            paths: vec![path.to_path_buf()],
        }),
    )
}

pub(super) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read `<stem>.<ext>` next to `grid`, trying lower- and upper-case
/// extensions.
fn read_sidecar(grid: &Path, ext: &str) -> Result<Option<(String, String)>> {
    let name = display_name(grid);
    let stem = file_stem(&name);
    for candidate in [ext.to_lowercase(), ext.to_uppercase()] {
        let path = grid.with_file_name(format!("{}.{}", stem, candidate));
        if path.is_file() {
            let text = fs::read_to_string(&path).map_err(|e| SourceError::io(&path, e))?;
            return Ok(Some((display_name(&path), text)));
        }
    }
    Ok(None)
}

/// `.prj` and world-file sidecars of a grid file.
pub(super) fn file_sidecars(grid: &Path) -> Result<Sidecars> {
    let prj = read_sidecar(grid, "prj")?.map(|(_, text)| text);
    let mut world = None;
    for ext in WORLD_FILE_EXTENSIONS {
        if let Some(found) = read_sidecar(grid, ext)? {
            world = Some(found);
            break;
        }
    }
    Ok(Sidecars { prj, world })
}

/// Reads layers from individual files on disk, one file per layer.
pub(super) struct FileReader {
    pub(super) paths: Vec<PathBuf>,
}

impl LayerReader for FileReader {
    fn read_layer(&mut self, index: usize) -> Result<AsciiGrid> {
        let path = self.paths.get(index).ok_or(SourceError::Exhausted(index))?;
        read_grid(open_grid_file(path)?, &display_name(path))
    }
}
