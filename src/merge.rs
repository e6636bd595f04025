//! N-way merge of cell sources: collapses duplicate keys by priority
//! (newest table wins), optionally hiding tombstones and applying expiry.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::cell::Cell;
use crate::error::EngineError;

/// Anything that can produce an ascending, key-deduplicated-within-itself
/// stream of cells starting at a given key. Implemented by both
/// [`crate::memtable::Memtable`] and [`crate::sstable::SSTable`].
pub trait CellSource {
    fn cells_from<'a>(
        &'a self,
        from: &'a [u8],
    ) -> Box<dyn Iterator<Item = Result<Cell, EngineError>> + 'a>;
}

struct HeapEntry {
    cell: Cell,
    source_idx: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cell.key == other.cell.key && self.source_idx == other.source_idx
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    /// Min-heap by `(key ASC, source_idx ASC)`: smallest key first, and
    /// among equal keys the lowest `source_idx` (highest priority) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cell
            .key
            .cmp(&self.cell.key)
            .then_with(|| other.source_idx.cmp(&self.source_idx))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges cursors already ordered highest-priority-first (memtable, then
/// flushing memtables newest-first, then SSTables by descending
/// generation) into a single ascending stream with one cell per key.
pub struct MergeIterator<'a> {
    cursors: Vec<Box<dyn Iterator<Item = Result<Cell, EngineError>> + 'a>>,
    heap: BinaryHeap<HeapEntry>,
    now: i64,
    errored: bool,
}

impl<'a> MergeIterator<'a> {
    pub fn new(
        mut cursors: Vec<Box<dyn Iterator<Item = Result<Cell, EngineError>> + 'a>>,
        now: i64,
    ) -> Result<Self, EngineError> {
        let mut heap = BinaryHeap::new();
        for (idx, cursor) in cursors.iter_mut().enumerate() {
            if let Some(item) = cursor.next() {
                heap.push(HeapEntry {
                    cell: item?,
                    source_idx: idx,
                });
            }
        }
        Ok(Self {
            cursors,
            heap,
            now,
            errored: false,
        })
    }

    fn advance(&mut self, idx: usize) -> Result<(), EngineError> {
        if let Some(item) = self.cursors[idx].next() {
            self.heap.push(HeapEntry {
                cell: item?,
                source_idx: idx,
            });
        }
        Ok(())
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<Cell, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        let winner = self.heap.pop()?;
        if let Err(e) = self.advance(winner.source_idx) {
            self.errored = true;
            return Some(Err(e));
        }

        while let Some(top) = self.heap.peek() {
            if top.cell.key != winner.cell.key {
                break;
            }
            let dup = self.heap.pop().expect("peeked Some");
            if let Err(e) = self.advance(dup.source_idx) {
                self.errored = true;
                return Some(Err(e));
            }
        }

        Some(Ok(winner.cell.effective(self.now)))
    }
}

/// Adapts a cell stream to drop tombstones, for user-facing reads.
pub fn fresh_cells<'a, I>(iter: I) -> impl Iterator<Item = Result<Cell, EngineError>> + 'a
where
    I: Iterator<Item = Result<Cell, EngineError>> + 'a,
{
    iter.filter(|item| !matches!(item, Ok(cell) if cell.value.is_none()))
}
