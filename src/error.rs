//! Error taxonomy, composed from per-module errors up to the HTTP boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SSTableError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt sstable: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum MemtableError {
    #[error("key not found")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("key not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sstable error: {0}")]
    SSTable(#[from] SSTableError),
    #[error("engine is closed")]
    Interrupted,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MemtableError> for EngineError {
    fn from(e: MemtableError) -> Self {
        match e {
            MemtableError::NotFound => EngineError::NotFound,
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("key not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("fewer than {ack} of {from} replicas responded in time")]
    QuorumFailed { ack: usize, from: usize },
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("internal error: {0}")]
    Internal(String),
}
