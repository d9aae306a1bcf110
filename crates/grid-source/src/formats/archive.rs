//! Tar archive of ESRI ASCII grids: one layer per grid entry, archive order.
//!
//! The archive is indexed once at open time; each layer is later read by
//! seeking straight to its entry's data.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tar::{Archive, EntryType};
use tracing::debug;

use super::{assemble, OpenOptions, Sidecars, WORLD_FILE_EXTENSIONS};
use crate::ascii_grid::{grid_bytes_reader, read_grid, read_header, AsciiGrid};
use crate::dataset::{GridDataset, LayerReader};
use crate::error::{Result, SourceError};
use crate::metadata::{file_stem, is_ascii_grid_name};

const USTAR_MAGIC: &[u8] = b"ustar";
const USTAR_OFFSET: u64 = 257;

/// Largest sidecar (`.prj`, world file) read into memory.
const MAX_SIDECAR_BYTES: u64 = 1 << 20;

/// Bytes reserved up front when reading an entry.
const MAX_PREALLOCATED_BYTES: usize = 1 << 27;

/// Location of one regular entry's data inside a tar file.
#[derive(Debug, Clone)]
pub(super) struct TarByteRange {
    pub name: String,
    pub offset: u64,
    pub length: u64,
}

pub(super) fn probe(path: &Path) -> bool {
    is_ustar(path)
}

/// True for a regular file carrying the ustar magic.
pub(super) fn is_ustar(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 5];
    file.seek(SeekFrom::Start(USTAR_OFFSET)).is_ok()
        && file.read_exact(&mut magic).is_ok()
        && magic == USTAR_MAGIC
}

pub(super) fn open(path: &Path, options: &OpenOptions) -> Result<GridDataset> {
    let io_err = |e| SourceError::io(path, e);
    let file = File::open(path).map_err(io_err)?;
    let mut archive = Archive::new(file);

    let mut grids = Vec::new();
    let mut sidecars: HashMap<String, String> = HashMap::new();

    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        if entry.header().entry_type() != EntryType::Regular {
            continue;
        }
        let name = entry.path().map_err(io_err)?.to_string_lossy().into_owned();

        if is_ascii_grid_name(&name) {
            grids.push(TarByteRange {
                name,
                offset: entry.raw_file_position(),
                length: entry.size(),
            });
            continue;
        }

        let lower = name.to_lowercase();
        let is_sidecar = lower.ends_with(".prj")
            || WORLD_FILE_EXTENSIONS
                .iter()
                .any(|ext| lower.ends_with(&format!(".{}", ext)));
        if is_sidecar && entry.size() <= MAX_SIDECAR_BYTES {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(io_err)?;
            sidecars.insert(name, text);
        }
    }

    let first = grids
        .first()
        .cloned()
        .ok_or_else(|| SourceError::Empty(path.to_path_buf()))?;
    debug!(entries = grids.len(), sidecars = sidecars.len(), "Indexed grid archive");

    let mut reader = TarReader {
        tar: TarFile::open(path)?,
        entries: grids,
    };
    let bytes = reader.tar.entry_bytes(&first)?;
    let header = read_header(grid_bytes_reader(&bytes), &first.name)?;

    let names: Vec<String> = reader.entries.iter().map(|e| e.name.clone()).collect();
    let sidecars = pick_sidecars(&first.name, sidecars);
    assemble(
        path,
        "grid-tar",
        &names,
        &header,
        sidecars,
        options,
        Box::new(reader),
    )
}

/// Prefer sidecars named after the first grid; otherwise take any `.prj`.
fn pick_sidecars(first_grid: &str, mut found: HashMap<String, String>) -> Sidecars {
    let dir = first_grid.rsplit_once('/').map(|(d, _)| format!("{}/", d)).unwrap_or_default();
    let stem = format!("{}{}", dir, file_stem(first_grid)).to_lowercase();

    let mut take = |ext: &str| -> Option<(String, String)> {
        let wanted = format!("{}.{}", stem, ext);
        let key = found.keys().find(|k| k.to_lowercase() == wanted)?.clone();
        found.remove_entry(&key)
    };

    let prj = take("prj").map(|(_, text)| text);
    let world = WORLD_FILE_EXTENSIONS.iter().find_map(|ext| take(*ext));

    let prj = prj.or_else(|| {
        let mut names: Vec<&String> = found
            .keys()
            .filter(|k| k.to_lowercase().ends_with(".prj"))
            .collect();
        names.sort();
        names.first().and_then(|k| found.get(*k)).cloned()
    });

    Sidecars { prj, world }
}

/// Random access to the entries of an indexed tar file.
pub(super) struct TarFile {
    path: PathBuf,
    file: File,
}

impl TarFile {
    pub(super) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub(super) fn entry_bytes(&mut self, range: &TarByteRange) -> Result<Vec<u8>> {
        let io_err = |e| SourceError::io(&self.path, e);
        self.file.seek(SeekFrom::Start(range.offset)).map_err(io_err)?;
        let mut buf = Vec::with_capacity((range.length as usize).min(MAX_PREALLOCATED_BYTES));
        (&mut self.file)
            .take(range.length)
            .read_to_end(&mut buf)
            .map_err(|e| SourceError::io(&self.path, e))?;
        if (buf.len() as u64) < range.length {
            return Err(SourceError::data(&range.name, "archive entry is truncated"));
        }
        Ok(buf)
    }
}

struct TarReader {
    tar: TarFile,
    entries: Vec<TarByteRange>,
}

impl LayerReader for TarReader {
    fn read_layer(&mut self, index: usize) -> Result<AsciiGrid> {
        let range = self
            .entries
            .get(index)
            .cloned()
            .ok_or(SourceError::Exhausted(index))?;
        let bytes = self.tar.entry_bytes(&range)?;
        read_grid(grid_bytes_reader(&bytes), &range.name)
    }
}
