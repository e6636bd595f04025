//! Writes a sorted cell stream to a new SSTable, atomically.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cell::Cell;
use crate::error::SSTableError;

use super::codec;

/// Streams cells to a `.tmp` file in ascending key order, then renames it
/// into place on [`SSTableWriter::finish`]. Crash between those two steps
/// leaves only an orphan `.tmp` file, which `Engine::open` ignores.
pub struct SSTableWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    cell_bytes_written: u64,
    offsets: Vec<u64>,
    last_key: Option<Vec<u8>>,
}

impl SSTableWriter {
    pub fn create(final_path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let final_path = final_path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("tmp");
        let file = File::create(&tmp_path)?;
        Ok(Self {
            final_path,
            tmp_path,
            file: BufWriter::new(file),
            cell_bytes_written: 0,
            offsets: Vec::new(),
            last_key: None,
        })
    }

    /// Appends one cell. Cells must be supplied in strictly ascending key
    /// order.
    pub fn append(&mut self, cell: &Cell) -> Result<(), SSTableError> {
        if let Some(last) = &self.last_key {
            if cell.key <= *last {
                return Err(SSTableError::Corrupt(format!(
                    "cells out of order: {:?} after {:?}",
                    cell.key, last
                )));
            }
        }
        self.offsets.push(self.cell_bytes_written);

        let mut buf = Vec::new();
        let written = codec::encode_cell(cell, &mut buf);
        self.file.write_all(&buf)?;
        self.cell_bytes_written += written as u64;
        self.last_key = Some(cell.key.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Writes the offsets region and trailer, flushes, and atomically
    /// renames the `.tmp` file into place.
    pub fn finish(mut self) -> Result<(), SSTableError> {
        for offset in &self.offsets {
            self.file.write_all(&offset.to_be_bytes())?;
        }
        let cell_count = self.offsets.len() as u32;
        self.file.write_all(&cell_count.to_be_bytes())?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }
}
