//! The storage engine: orchestrates the memtable, SSTables, and the
//! merge iterator behind `upsert`/`remove`/`get`/`range_scan`/`compact`.
//!
//! A single reader/writer lock protects the current [`TableSet`]
//! reference. Readers clone the `Arc<TableSet>` and release the lock
//! immediately; all I/O (flush, compaction, peer requests higher up the
//! stack) happens between lock acquisitions, never across one.

mod flush_pool;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::cell::{Cell, Clock};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::merge::{fresh_cells, CellSource, MergeIterator};
use crate::sstable::{SSTable, SSTableWriter};
use crate::tableset::TableSet;

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as i64
}

struct Shared {
    inner: RwLock<Arc<TableSet>>,
    compaction_lock: Mutex<()>,
    clock: Clock,
    dir: PathBuf,
    config: EngineConfig,
    flush_pool: flush_pool::FlushPool,
    closed: AtomicBool,
}

/// A thread-safe handle to one engine instance. Cheap to clone — every
/// clone shares the same underlying state.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

fn dat_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{generation}.dat"))
}

impl Engine {
    /// Opens (creating if necessary) an engine rooted at `dir`, discovering
    /// existing SSTables and computing the next generation to assign.
    pub fn open(dir: impl AsRef<Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut generations: Vec<u64> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("tmp") => {
                    info!(path = %path.display(), "removing orphaned temp file at open");
                    let _ = fs::remove_file(&path);
                }
                Some("dat") => {
                    let generation = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(|s| s.parse::<u64>().ok())
                        .ok_or_else(|| {
                            EngineError::Internal(format!(
                                "unparseable sstable file name: {}",
                                path.display()
                            ))
                        })?;
                    generations.push(generation);
                }
                _ => {}
            }
        }
        generations.sort_unstable();

        let mut ss_tables = std::collections::BTreeMap::new();
        for generation in &generations {
            let table = SSTable::open(*generation, dat_path(&dir, *generation))?;
            ss_tables.insert(*generation, Arc::new(table));
        }
        let next_generation = generations.last().map_or(1, |g| g + 1);

        let table_set = TableSet {
            mem_table: Arc::new(crate::memtable::Memtable::new()),
            flushing: Vec::new(),
            ss_tables,
            next_generation,
        };

        info!(dir = %dir.display(), sstables = generations.len(), next_generation, "engine opened");

        Ok(Self {
            shared: Arc::new(Shared {
                inner: RwLock::new(Arc::new(table_set)),
                compaction_lock: Mutex::new(()),
                clock: Clock::new(),
                dir,
                flush_pool: flush_pool::FlushPool::new(config.flush_worker_count),
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    fn snapshot(&self) -> Arc<TableSet> {
        self.shared
            .inner
            .read()
            .expect("table set lock poisoned")
            .clone()
    }

    fn check_open(&self) -> Result<(), EngineError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(EngineError::Interrupted);
        }
        Ok(())
    }

    /// Inserts or replaces `key`'s value. `expire` is an absolute instant
    /// (nanoseconds since epoch); `None` means it never expires.
    pub fn upsert(&self, key: Vec<u8>, value: Vec<u8>, expire: Option<i64>) -> Result<(), EngineError> {
        self.check_open()?;
        let timestamp = self.shared.clock.tick();
        let cell = Cell::present(key, value, timestamp, expire.unwrap_or(crate::cell::FOREVER));
        let snapshot = self.snapshot();
        snapshot.mem_table.put(cell);
        self.maybe_schedule_flush();
        Ok(())
    }

    pub fn remove(&self, key: Vec<u8>) -> Result<(), EngineError> {
        self.check_open()?;
        let timestamp = self.shared.clock.tick();
        let snapshot = self.snapshot();
        snapshot.mem_table.put(Cell::tombstone(key, timestamp));
        self.maybe_schedule_flush();
        Ok(())
    }

    /// Returns the current value for `key`, or `NotFound` if absent,
    /// tombstoned, or expired.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, EngineError> {
        self.check_open()?;
        let snapshot = self.snapshot();
        let now = now_nanos();

        if let Some(cell) = snapshot.mem_table.get(key) {
            return Self::resolve(cell, now);
        }
        for frozen in &snapshot.flushing {
            if let Some(cell) = frozen.get(key) {
                return Self::resolve(cell, now);
            }
        }
        for table in snapshot.ss_tables.values().rev() {
            if let Some(cell) = table.get(key)? {
                return Self::resolve(cell, now);
            }
        }
        Err(EngineError::NotFound)
    }

    fn resolve(cell: Cell, now: i64) -> Result<Vec<u8>, EngineError> {
        cell.effective(now).value.ok_or(EngineError::NotFound)
    }

    /// Returns the raw effective cell for `key` (present, tombstone, or
    /// expired-rewritten-to-tombstone), or `None` if the key has never
    /// been written. Used by the replication layer, which needs the
    /// cell's timestamp and kind, not just its value.
    pub fn peek(&self, key: &[u8]) -> Result<Option<Cell>, EngineError> {
        self.check_open()?;
        let snapshot = self.snapshot();
        let now = now_nanos();

        if let Some(cell) = snapshot.mem_table.get(key) {
            return Ok(Some(cell.effective(now)));
        }
        for frozen in &snapshot.flushing {
            if let Some(cell) = frozen.get(key) {
                return Ok(Some(cell.effective(now)));
            }
        }
        for table in snapshot.ss_tables.values().rev() {
            if let Some(cell) = table.get(key)? {
                return Ok(Some(cell.effective(now)));
            }
        }
        Ok(None)
    }

    /// Returns a snapshot-consistent, ascending iterator over fresh
    /// (non-tombstone, non-expired) `(key, value)` pairs with `key >= from`.
    pub fn range_scan(&self, from: &[u8]) -> Result<RangeScan, EngineError> {
        self.check_open()?;
        let snapshot = self.snapshot();
        let now = now_nanos();

        let mut owned: Vec<Vec<Cell>> = Vec::with_capacity(
            1 + snapshot.flushing.len() + snapshot.ss_tables.len(),
        );
        for source in snapshot.cell_sources() {
            let cells: Result<Vec<Cell>, EngineError> = source.cells_from(from).collect();
            owned.push(cells?);
        }

        let cursors: Vec<Box<dyn Iterator<Item = Result<Cell, EngineError>>>> = owned
            .into_iter()
            .map(|v| Box::new(v.into_iter().map(Ok)) as Box<dyn Iterator<Item = Result<Cell, EngineError>>>)
            .collect();

        let merged = MergeIterator::new(cursors, now)?;
        Ok(RangeScan {
            inner: Box::new(fresh_cells(merged)),
        })
    }

    fn maybe_schedule_flush(&self) {
        let snapshot = self.snapshot();
        if snapshot.mem_table.size_in_bytes() < self.shared.config.flush_threshold_bytes {
            return;
        }
        self.schedule_flush();
    }

    /// Forces a flush of the current memtable, if non-empty, on the
    /// background worker pool. Returns immediately.
    pub fn schedule_flush(&self) {
        let shared = self.shared.clone();
        let Some((frozen, generation)) = Self::freeze(&shared) else {
            return;
        };
        shared.flush_pool.submit(Box::new(move || {
            if let Err(e) = Self::run_flush(&shared, frozen, generation) {
                warn!(generation, error = %e, "flush failed, memtable remains frozen for retry");
            }
        }));
    }

    /// Freezes the active memtable under the write lock, returning the
    /// frozen memtable and the generation it will become, or `None` if
    /// there was nothing to freeze.
    fn freeze(shared: &Arc<Shared>) -> Option<(Arc<crate::memtable::Memtable>, u64)> {
        let mut guard = shared.inner.write().expect("table set lock poisoned");
        let current = guard.clone();
        if current.mem_table.is_empty() {
            return None;
        }
        let generation = current.next_generation;
        let frozen = current.mem_table.clone();
        *guard = Arc::new(current.mark_as_flushing());
        debug!(generation, "memtable frozen for flush");
        Some((frozen, generation))
    }

    fn run_flush(
        shared: &Arc<Shared>,
        frozen: Arc<crate::memtable::Memtable>,
        generation: u64,
    ) -> Result<(), EngineError> {
        let path = dat_path(&shared.dir, generation);
        let mut writer = SSTableWriter::create(&path)?;
        for cell in frozen.snapshot_all() {
            writer.append(&cell)?;
        }
        let cell_count = writer.len();
        writer.finish()?;
        let table = Arc::new(SSTable::open(generation, &path)?);

        let mut guard = shared.inner.write().expect("table set lock poisoned");
        let current = guard.clone();
        *guard = Arc::new(current.move_to_flushed_files(&frozen, table, generation));
        info!(generation, cell_count, "flush complete");
        Ok(())
    }

    /// Merges every live SSTable into one, dropping tombstones (this
    /// compaction always produces the sole remaining table, so no older
    /// table could contain a contradicting value).
    pub fn compact(&self) -> Result<(), EngineError> {
        self.check_open()?;
        let _guard = self
            .shared
            .compaction_lock
            .lock()
            .expect("compaction lock poisoned");

        let snapshot = self.snapshot();
        if snapshot.ss_tables.is_empty() {
            return Ok(());
        }
        let old_generations: Vec<u64> = snapshot.ss_tables.keys().copied().collect();
        let now = now_nanos();

        let mut owned: Vec<Vec<Cell>> = Vec::with_capacity(snapshot.ss_tables.len());
        for table in snapshot.ss_tables.values().rev() {
            let cells: Result<Vec<Cell>, EngineError> = table.scan_all().map(|r| r.map_err(EngineError::from)).collect();
            owned.push(cells?);
        }
        let cursors: Vec<Box<dyn Iterator<Item = Result<Cell, EngineError>>>> = owned
            .into_iter()
            .map(|v| Box::new(v.into_iter().map(Ok)) as Box<dyn Iterator<Item = Result<Cell, EngineError>>>)
            .collect();
        let merged = MergeIterator::new(cursors, now)?;
        let live_cells = fresh_cells(merged);

        let generation = {
            let guard = self.shared.inner.read().expect("table set lock poisoned");
            guard.next_generation
        };
        let path = dat_path(&self.shared.dir, generation);
        let mut writer = SSTableWriter::create(&path)?;
        for cell in live_cells {
            writer.append(&cell?)?;
        }
        let cell_count = writer.len();
        writer.finish()?;
        let new_table = Arc::new(SSTable::open(generation, &path)?);

        {
            let mut guard = self.shared.inner.write().expect("table set lock poisoned");
            let current = guard.clone();
            *guard = Arc::new(current.replace_compacted_files(&old_generations, new_table, generation));
        }

        for generation in old_generations {
            let old_path = dat_path(&self.shared.dir, generation);
            if let Err(e) = fs::remove_file(&old_path) {
                warn!(generation, error = %e, "failed to remove compacted-away sstable file");
            }
        }
        info!(generation, cell_count, "compaction complete");
        Ok(())
    }

    /// Flushes a non-empty memtable synchronously, waits for any
    /// outstanding background flush to drain, and marks the engine closed.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some((frozen, generation)) = Self::freeze(&self.shared) {
            Self::run_flush(&self.shared, frozen, generation)?;
        }
        self.shared.flush_pool.drain(self.shared.config.close_drain_timeout);
        info!("engine closed");
        Ok(())
    }
}

/// A snapshot-consistent scan over `(key, value)` pairs.
pub struct RangeScan {
    inner: Box<dyn Iterator<Item = Result<Cell, EngineError>>>,
}

impl Iterator for RangeScan {
    type Item = Result<(Vec<u8>, Vec<u8>), EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(cell) => {
                let value = cell.value.expect("fresh_cells filters tombstones");
                Some(Ok((cell.key, value)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
