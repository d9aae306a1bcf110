//! A directory of ESRI ASCII grids: one layer per file, sorted by name.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::ascii::{display_name, file_sidecars, FileReader};
use super::{assemble, OpenOptions};
use crate::ascii_grid::{open_grid_file, read_header};
use crate::dataset::GridDataset;
use crate::error::{Result, SourceError};
use crate::metadata::is_ascii_grid_name;

/// Grid files directly inside `dir`, sorted by file name.
fn grid_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_ascii_grid_name(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect()
}

/// `.prj` files directly inside `dir`, sorted by file name.
fn prj_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().to_lowercase().ends_with(".prj"))
        .map(|e| e.into_path())
        .collect()
}

pub(super) fn probe(path: &Path) -> bool {
    path.is_dir() && !grid_files(path).is_empty()
}

pub(super) fn open(path: &Path, options: &OpenOptions) -> Result<GridDataset> {
    let files = grid_files(path);
    let first = files
        .first()
        .ok_or_else(|| SourceError::Empty(path.to_path_buf()))?;
    let header = read_header(open_grid_file(first)?, &display_name(first))?;

    let mut sidecars = file_sidecars(first)?;
    if sidecars.prj.is_none() {
        // Fall back to any projection file shipped in the directory
        if let Some(prj) = prj_files(path).first() {
            sidecars.prj = Some(std::fs::read_to_string(prj).map_err(|e| SourceError::io(prj, e))?);
        }
    }

    let names: Vec<String> = files.iter().map(|f| display_name(f)).collect();
    assemble(
        path,
        "grid-directory",
        &names,
        &header,
        sidecars,
        options,
        Box::new(FileReader { paths: files }),
    )
}
