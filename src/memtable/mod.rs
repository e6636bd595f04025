//! In-memory write buffer: one cell per key, snapshot-consistent reads.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use tracing::trace;

use crate::cell::Cell;
use crate::error::{EngineError, MemtableError};
use crate::merge::CellSource;

/// Per-entry bookkeeping overhead charged against the flush threshold, on
/// top of key and value length. Approximate by design — this only needs
/// to be in the right ballpark to trigger flushes at a sane cadence.
const ENTRY_OVERHEAD_BYTES: usize = 32;

fn hex_key(key: &[u8]) -> String {
    if key.len() <= 32 {
        key.iter().map(|b| format!("{b:02x}")).collect()
    } else {
        let mut s: String = key[..16].iter().map(|b| format!("{b:02x}")).collect();
        s.push_str(&format!("...[{} bytes]", key.len()));
        s
    }
}

/// An ordered map from key to its single live cell, guarded by its own
/// lock so concurrent writers can mutate it while it is still the active
/// table referenced by an immutable [`crate::tableset::TableSet`].
#[derive(Debug, Default)]
pub struct Memtable {
    tree: RwLock<BTreeMap<Vec<u8>, Cell>>,
    approximate_size: AtomicUsize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell_size(cell: &Cell) -> usize {
        cell.key.len() + cell.value.as_ref().map_or(0, Vec::len) + ENTRY_OVERHEAD_BYTES
    }

    /// Inserts or replaces the cell for `key`. The caller has already
    /// chosen the timestamp (via the engine's [`crate::cell::Clock`]).
    pub fn put(&self, cell: Cell) {
        let mut tree = self.tree.write().expect("memtable lock poisoned");
        let added = Self::cell_size(&cell);
        let removed = tree.get(&cell.key).map_or(0, Self::cell_size);
        trace!(key = %hex_key(&cell.key), timestamp = cell.timestamp, "memtable put");
        tree.insert(cell.key.clone(), cell);
        self.approximate_size
            .fetch_add(added.saturating_sub(removed), Ordering::Relaxed);
    }

    /// Returns the live cell for `key`, if any is buffered here.
    pub fn get(&self, key: &[u8]) -> Option<Cell> {
        let tree = self.tree.read().expect("memtable lock poisoned");
        tree.get(key).cloned()
    }

    pub fn get_or_err(&self, key: &[u8]) -> Result<Cell, MemtableError> {
        self.get(key).ok_or(MemtableError::NotFound)
    }

    /// A consistent snapshot of every cell with `key >= from`, in
    /// ascending order. A `Vec` rather than a cursor, since
    /// `BTreeMap::range` cannot outlive the read-lock guard.
    pub fn snapshot_from(&self, from: &[u8]) -> Vec<Cell> {
        let tree = self.tree.read().expect("memtable lock poisoned");
        tree.range(from.to_vec()..).map(|(_, c)| c.clone()).collect()
    }

    /// A full ordered snapshot, used when flushing to an SSTable.
    pub fn snapshot_all(&self) -> Vec<Cell> {
        let tree = self.tree.read().expect("memtable lock poisoned");
        tree.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().expect("memtable lock poisoned").is_empty()
    }

    pub fn len(&self) -> usize {
        self.tree.read().expect("memtable lock poisoned").len()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }
}

impl CellSource for Memtable {
    fn cells_from<'a>(
        &'a self,
        from: &'a [u8],
    ) -> Box<dyn Iterator<Item = Result<Cell, EngineError>> + 'a> {
        Box::new(self.snapshot_from(from).into_iter().map(Ok))
    }
}
