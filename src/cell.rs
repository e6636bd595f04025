//! The per-key storage unit shared by the memtable and every SSTable.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel `expire` value meaning "never expires".
pub const FOREVER: i64 = i64::MAX;

/// Whether a cell carries a live value or marks a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Present,
    Tombstone,
}

/// One versioned entry for a key: present value or tombstone, with an
/// optional expiration instant.
#[derive(Debug, Clone)]
pub struct Cell {
    pub key: Vec<u8>,
    pub timestamp: i64,
    pub kind: CellKind,
    pub expire: i64,
    pub value: Option<Vec<u8>>,
}

impl Cell {
    pub fn present(key: Vec<u8>, value: Vec<u8>, timestamp: i64, expire: i64) -> Self {
        Self {
            key,
            timestamp,
            kind: CellKind::Present,
            expire,
            value: Some(value),
        }
    }

    pub fn tombstone(key: Vec<u8>, timestamp: i64) -> Self {
        Self {
            key,
            timestamp,
            kind: CellKind::Tombstone,
            expire: FOREVER,
            value: None,
        }
    }

    /// Whether this cell should be treated as absent as of `now`, either
    /// because it is a tombstone or because its TTL has elapsed.
    pub fn is_live(&self, now: i64) -> bool {
        matches!(self.kind, CellKind::Present) && self.expire > now
    }

    /// Rewrites an expired PRESENT cell into a TOMBSTONE of the same
    /// timestamp, as required before emission from the merge iterator.
    pub fn effective(self, now: i64) -> Cell {
        if self.is_live(now) {
            self
        } else {
            Cell {
                value: None,
                kind: CellKind::Tombstone,
                ..self
            }
        }
    }
}

/// Monotonic, strictly increasing logical clock used to timestamp every
/// write. Two writes observed in the same nanosecond still receive
/// distinct values.
#[derive(Debug)]
pub struct Clock {
    last: AtomicI64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }

    /// Produces the next timestamp: `max(previous + 1, wall_clock_nanos)`.
    pub fn tick(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos() as i64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(cur) => prev = cur,
            }
        }
    }
}
