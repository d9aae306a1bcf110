//! Temporary per-layer value columns for multi-column output.
//!
//! Each layer's transformed values are written to their own file, one
//! little-endian `f64` per cell in row-major order, NaN marking an absent
//! value. After the last layer the columns are read back in lock-step, one
//! block of cells at a time, so only one column file is open at once no
//! matter how many layers were spilled.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// Upper bound on values held in memory by a reader (8 MiB of `f64`).
const BLOCK_VALUES: usize = 1 << 20;

/// Spilled columns of one run. Files are removed on drop.
pub struct ColumnSpill {
    dir: TempDir,
    columns: Vec<PathBuf>,
    cells: usize,
}

impl ColumnSpill {
    /// Create an empty spill area under `parent` (system temp when `None`).
    pub fn new(parent: Option<&Path>, cells: usize) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("grid2point-spill-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        debug!(dir = %dir.path().display(), cells, "Created spill directory");
        Ok(Self {
            dir,
            columns: Vec::new(),
            cells,
        })
    }

    /// Directory holding the column files.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Start a new column.
    pub fn begin_column(&mut self) -> std::io::Result<ColumnWriter> {
        let path = self.dir.path().join(format!("column_{:05}.f64", self.columns.len()));
        let file = File::create(&path)?;
        self.columns.push(path);
        Ok(ColumnWriter {
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Read all finished columns cell by cell.
    pub fn reader(&self) -> ColumnReader {
        let block_cells = (BLOCK_VALUES / self.columns.len().max(1)).max(1);
        self.reader_with_block(block_cells)
    }

    fn reader_with_block(&self, block_cells: usize) -> ColumnReader {
        ColumnReader {
            columns: self.columns.clone(),
            cells: self.cells,
            block_cells,
            block: Vec::new(),
            block_len: 0,
            next: 0,
        }
    }
}

/// Writer for one spilled column.
pub struct ColumnWriter {
    writer: BufWriter<File>,
    written: usize,
}

impl ColumnWriter {
    pub fn push(&mut self, value: Option<f64>) -> std::io::Result<()> {
        self.written += 1;
        self.writer.write_all(&value.unwrap_or(f64::NAN).to_le_bytes())
    }

    /// Flush the column; returns the number of values written.
    pub fn finish(mut self) -> std::io::Result<usize> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

/// Lock-step reader over every spilled column.
///
/// Cells are loaded in blocks; `block` holds one run of `block_len` values
/// per column, column after column.
pub struct ColumnReader {
    columns: Vec<PathBuf>,
    cells: usize,
    block_cells: usize,
    block: Vec<f64>,
    block_len: usize,
    next: usize,
}

impl ColumnReader {
    /// Values of the next cell across all columns, `None` when exhausted.
    pub fn next_cell(&mut self) -> std::io::Result<Option<Vec<Option<f64>>>> {
        if self.next >= self.cells {
            return Ok(None);
        }
        let offset = self.next % self.block_cells;
        if offset == 0 {
            self.load_block()?;
        }
        self.next += 1;
        Ok(Some(
            (0..self.columns.len())
                .map(|c| self.block[c * self.block_len + offset])
                .map(|v| if v.is_nan() { None } else { Some(v) })
                .collect(),
        ))
    }

    fn load_block(&mut self) -> std::io::Result<()> {
        let start = self.next;
        let len = (self.cells - start).min(self.block_cells);
        self.block_len = len;
        self.block.clear();
        self.block.reserve(len * self.columns.len());

        let mut bytes = vec![0u8; len * 8];
        let mut value = [0u8; 8];
        for path in &self.columns {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start((start * 8) as u64))?;
            file.read_exact(&mut bytes)?;
            for chunk in bytes.chunks_exact(8) {
                value.copy_from_slice(chunk);
                self.block.push(f64::from_le_bytes(value));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spill_columns(cells: usize, columns: &[Vec<Option<f64>>]) -> ColumnSpill {
        let mut spill = ColumnSpill::new(None, cells).unwrap();
        for values in columns {
            let mut column = spill.begin_column().unwrap();
            for v in values {
                column.push(*v).unwrap();
            }
            assert_eq!(column.finish().unwrap(), cells);
        }
        spill
    }

    #[test]
    fn test_lock_step_columns() {
        let spill = spill_columns(
            3,
            &[
                vec![Some(1.0), None, Some(3.0)],
                vec![Some(10.0), Some(20.0), None],
            ],
        );

        let mut reader = spill.reader();
        assert_eq!(reader.next_cell().unwrap(), Some(vec![Some(1.0), Some(10.0)]));
        assert_eq!(reader.next_cell().unwrap(), Some(vec![None, Some(20.0)]));
        assert_eq!(reader.next_cell().unwrap(), Some(vec![Some(3.0), None]));
        assert_eq!(reader.next_cell().unwrap(), None);
    }

    #[test]
    fn test_reads_across_block_boundaries() {
        let cells = 7;
        let columns: Vec<Vec<Option<f64>>> = (0..3)
            .map(|c| {
                (0..cells)
                    .map(|i| if (i + c) % 4 == 0 { None } else { Some((c * 100 + i) as f64) })
                    .collect()
            })
            .collect();
        let spill = spill_columns(cells, &columns);

        for block_cells in [1, 2, 3, 7, 50] {
            let mut reader = spill.reader_with_block(block_cells);
            for i in 0..cells {
                let expected: Vec<Option<f64>> = columns.iter().map(|c| c[i]).collect();
                assert_eq!(reader.next_cell().unwrap(), Some(expected), "block {} cell {}", block_cells, i);
            }
            assert_eq!(reader.next_cell().unwrap(), None);
        }
    }

    #[test]
    fn test_many_columns_read_in_lock_step() {
        // More columns than a default per-process descriptor limit.
        let layers = 1500;
        let columns: Vec<Vec<Option<f64>>> = (0..layers)
            .map(|c| vec![Some(c as f64), None, Some(-(c as f64))])
            .collect();
        let spill = spill_columns(3, &columns);
        assert_eq!(spill.column_count(), layers);

        let mut reader = spill.reader();
        let first = reader.next_cell().unwrap().unwrap();
        assert_eq!(first.len(), layers);
        assert_eq!(first[1499], Some(1499.0));
        assert!(reader.next_cell().unwrap().unwrap().iter().all(Option::is_none));
        assert_eq!(reader.next_cell().unwrap().unwrap()[7], Some(-7.0));
        assert_eq!(reader.next_cell().unwrap(), None);
    }

    #[test]
    fn test_truncated_column_is_an_error() {
        let mut spill = ColumnSpill::new(None, 4).unwrap();
        let mut column = spill.begin_column().unwrap();
        column.push(Some(1.0)).unwrap();
        column.finish().unwrap();

        let mut reader = spill.reader();
        let err = reader.next_cell().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_spill_dir_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let spill = ColumnSpill::new(Some(parent.path()), 1).unwrap();
        assert!(spill.path().starts_with(parent.path()));
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 1);
        drop(spill);
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }
}
