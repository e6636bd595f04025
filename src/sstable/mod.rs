//! Immutable, on-disk, sorted table.
//!
//! ## On-disk format
//!
//! ```text
//! [cells region]
//!   for each cell, in ascending key order:
//!     key_len   : u32 BE
//!     key       : [u8; key_len]
//!     timestamp : i64 BE
//!     flags     : u8            bit0 = PRESENT, bit1 = HAS_EXPIRE
//!     expire    : i64 BE        present iff HAS_EXPIRE
//!     value_len : u32 BE        present iff PRESENT
//!     value     : [u8; value_len]  present iff PRESENT
//! [offsets region]
//!   for each cell, in the same order: start offset in the cells region, u64 BE
//! [trailer]
//!   cell_count : u32 BE
//! ```
//!
//! No checksums, bloom filters, or block index: the offsets region *is*
//! the index, and it is small enough to binary-search directly.

mod codec;
mod writer;

pub use writer::SSTableWriter;

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::cell::Cell;
use crate::error::{EngineError, SSTableError};
use crate::merge::CellSource;

/// An immutable, memory-mapped on-disk table.
pub struct SSTable {
    pub generation: u64,
    path: PathBuf,
    mmap: Mmap,
    cell_count: u32,
    /// Byte offset where the offsets region begins.
    offsets_start: usize,
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("generation", &self.generation)
            .field("path", &self.path)
            .field("cell_count", &self.cell_count)
            .finish()
    }
}

impl SSTable {
    /// Opens and memory-maps an existing `.dat` file.
    pub fn open(generation: u64, path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len() as usize;
        if file_len < 4 {
            return Err(SSTableError::Corrupt(format!(
                "{}: file too small for trailer",
                path.display()
            )));
        }
        let mmap = unsafe { Mmap::map(&file)? };

        let cell_count = u32::from_be_bytes(
            mmap[file_len - 4..file_len]
                .try_into()
                .expect("slice is exactly 4 bytes"),
        );
        let offsets_region_len = cell_count as usize * 8;
        let offsets_start = file_len
            .checked_sub(4)
            .and_then(|n| n.checked_sub(offsets_region_len))
            .ok_or_else(|| {
                SSTableError::Corrupt(format!(
                    "{}: offsets region ({} bytes for {} cells) does not fit before trailer",
                    path.display(),
                    offsets_region_len,
                    cell_count
                ))
            })?;

        Ok(Self {
            generation,
            path,
            mmap,
            cell_count,
            offsets_start,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }

    pub fn file_size(&self) -> usize {
        self.mmap.len()
    }

    fn offset_at(&self, index: usize) -> usize {
        let start = self.offsets_start + index * 8;
        u64::from_be_bytes(
            self.mmap[start..start + 8]
                .try_into()
                .expect("slice is exactly 8 bytes"),
        ) as usize
    }

    fn decode_cell_at(&self, offset: usize) -> Result<Cell, SSTableError> {
        codec::decode_cell(&self.mmap[offset..self.offsets_start])
            .map(|(cell, _)| cell)
            .map_err(|e| SSTableError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    fn decode_key_at(&self, offset: usize) -> Result<&[u8], SSTableError> {
        codec::decode_key(&self.mmap[offset..self.offsets_start])
            .map_err(|e| SSTableError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    /// Binary search over the offsets region for the first cell whose key
    /// is `>= from`. Returns `cell_count` (one past the end) if none.
    fn lower_bound(&self, from: &[u8]) -> Result<usize, SSTableError> {
        let mut lo = 0usize;
        let mut hi = self.cell_count as usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key = self.decode_key_at(self.offset_at(mid))?;
            if key < from {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Exact-key point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<Cell>, SSTableError> {
        let idx = self.lower_bound(key)?;
        if idx >= self.cell_count as usize {
            return Ok(None);
        }
        let offset = self.offset_at(idx);
        if self.decode_key_at(offset)? != key {
            return Ok(None);
        }
        Ok(Some(self.decode_cell_at(offset)?))
    }

    /// A forward cursor over cells with `key >= from`.
    pub fn scan_from(&self, from: &[u8]) -> Result<ScanIterator<'_>, SSTableError> {
        let idx = self.lower_bound(from)?;
        Ok(ScanIterator {
            table: self,
            next_index: idx,
        })
    }

    /// A forward cursor over every cell.
    pub fn scan_all(&self) -> ScanIterator<'_> {
        ScanIterator {
            table: self,
            next_index: 0,
        }
    }
}

/// Forward cursor over an [`SSTable`]'s cells.
pub struct ScanIterator<'a> {
    table: &'a SSTable,
    next_index: usize,
}

impl Iterator for ScanIterator<'_> {
    type Item = Result<Cell, SSTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.table.cell_count as usize {
            return None;
        }
        let offset = self.table.offset_at(self.next_index);
        self.next_index += 1;
        Some(self.table.decode_cell_at(offset))
    }
}

impl CellSource for SSTable {
    fn cells_from<'a>(
        &'a self,
        from: &'a [u8],
    ) -> Box<dyn Iterator<Item = Result<Cell, EngineError>> + 'a> {
        match self.scan_from(from) {
            Ok(iter) => Box::new(iter.map(|r| r.map_err(EngineError::from))),
            Err(e) => Box::new(std::iter::once(Err(EngineError::from(e)))),
        }
    }
}
