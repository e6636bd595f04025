//! Typed engine tuning and cluster topology configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the storage engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memtable size, in bytes, at which a flush is scheduled.
    pub flush_threshold_bytes: usize,
    /// Number of background threads available to run flushes.
    pub flush_worker_count: usize,
    /// Upper bound the engine waits for outstanding flushes to drain on close.
    pub close_drain_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: 4 * 1024 * 1024,
            flush_worker_count: 2,
            close_drain_timeout: Duration::from_secs(30),
        }
    }
}

/// The static cluster topology: this node's identity, every node's base
/// URL, and the default read/write quorum.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    #[serde(rename = "self")]
    pub self_id: String,
    pub nodes: BTreeMap<String, String>,
    pub ack: usize,
    pub from: usize,
}

impl ClusterConfig {
    /// Loads and minimally validates a topology file. Parsing the general
    /// shape of the file is delegated to `serde_json`; only the
    /// cluster-level invariants this crate relies on are checked here.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
        let cfg: ClusterConfig = serde_json::from_str(&text).map_err(ConfigError::Json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.nodes.contains_key(&self.self_id) {
            return Err(ConfigError::Invalid(format!(
                "topology does not list self id {:?}",
                self.self_id
            )));
        }
        let n = self.nodes.len();
        if self.ack == 0 || self.ack > self.from || self.from > n {
            return Err(ConfigError::Invalid(format!(
                "quorum ack={} from={} invalid for {} node(s)",
                self.ack, self.from, n
            )));
        }
        Ok(())
    }

    /// Single-node topology, useful for tests and standalone operation.
    pub fn single_node(self_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let self_id = self_id.into();
        let mut nodes = BTreeMap::new();
        nodes.insert(self_id.clone(), base_url.into());
        Self {
            self_id,
            nodes,
            ack: 1,
            from: 1,
        }
    }

    /// Node ids in a stable order, used as the universe rendezvous
    /// hashing selects from.
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading topology file: {0}")]
    Io(std::io::Error),
    #[error("malformed topology file: {0}")]
    Json(serde_json::Error),
    #[error("invalid topology: {0}")]
    Invalid(String),
}
