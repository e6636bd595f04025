//! An immutable snapshot of engine state and its pure transition
//! functions. Every transition is applied under the engine's write lock
//! and produces a brand new `TableSet`; readers holding an older `Arc`
//! clone keep seeing a fully consistent (if slightly stale) view.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::memtable::Memtable;
use crate::merge::CellSource;
use crate::sstable::SSTable;

#[derive(Clone)]
pub struct TableSet {
    pub mem_table: Arc<Memtable>,
    /// Memtables currently being flushed, newest first.
    pub flushing: Vec<Arc<Memtable>>,
    /// Live SSTables keyed by generation.
    pub ss_tables: BTreeMap<u64, Arc<SSTable>>,
    /// Generation to assign to the next table this engine produces.
    pub next_generation: u64,
}

impl TableSet {
    pub fn empty(next_generation: u64) -> Self {
        Self {
            mem_table: Arc::new(Memtable::new()),
            flushing: Vec::new(),
            ss_tables: BTreeMap::new(),
            next_generation,
        }
    }

    /// Freezes the active memtable: it moves to the front of `flushing`
    /// and a fresh empty memtable takes its place. `next_generation` is
    /// unchanged — a frozen memtable has not produced a file yet.
    pub fn mark_as_flushing(&self) -> Self {
        let mut flushing = Vec::with_capacity(self.flushing.len() + 1);
        flushing.push(self.mem_table.clone());
        flushing.extend(self.flushing.iter().cloned());
        Self {
            mem_table: Arc::new(Memtable::new()),
            flushing,
            ss_tables: self.ss_tables.clone(),
            next_generation: self.next_generation,
        }
    }

    /// Promotes a flushed memtable to its on-disk SSTable at generation
    /// `g`, removing it from `flushing`.
    pub fn move_to_flushed_files(
        &self,
        flushed: &Arc<Memtable>,
        new_table: Arc<SSTable>,
        g: u64,
    ) -> Self {
        let flushing = self
            .flushing
            .iter()
            .filter(|m| !Arc::ptr_eq(m, flushed))
            .cloned()
            .collect();
        let mut ss_tables = self.ss_tables.clone();
        ss_tables.insert(g, new_table);
        Self {
            mem_table: self.mem_table.clone(),
            flushing,
            ss_tables,
            next_generation: self.next_generation.max(g + 1),
        }
    }

    /// Atomically swaps every SSTable named in `old_generations` for a
    /// single `new_table` at generation `g`.
    pub fn replace_compacted_files(
        &self,
        old_generations: &[u64],
        new_table: Arc<SSTable>,
        g: u64,
    ) -> Self {
        let mut ss_tables = self.ss_tables.clone();
        for gen in old_generations {
            ss_tables.remove(gen);
        }
        ss_tables.insert(g, new_table);
        Self {
            mem_table: self.mem_table.clone(),
            flushing: self.flushing.clone(),
            ss_tables,
            next_generation: self.next_generation.max(g + 1),
        }
    }

    /// Cursors over every live cell source, in priority order: the
    /// active memtable, then frozen memtables newest-first, then
    /// SSTables by descending generation.
    pub fn cell_sources(&self) -> Vec<&dyn CellSource> {
        let mut sources: Vec<&dyn CellSource> = Vec::new();
        sources.push(self.mem_table.as_ref());
        sources.extend(self.flushing.iter().map(|m| m.as_ref() as &dyn CellSource));
        sources.extend(
            self.ss_tables
                .values()
                .rev()
                .map(|t| t.as_ref() as &dyn CellSource),
        );
        sources
    }
}
