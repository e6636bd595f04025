//! Rendezvous (highest-random-weight) hashing over a static node set.
//!
//! Chosen over a hash ring because cluster membership here is static
//! (dynamic membership is an explicit non-goal): a ring's incremental
//! rebalancing machinery buys nothing when the node set never changes,
//! while rendezvous hashing still gives a deterministic, evenly
//! distributed replica set of any size without pre-built ring state.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn weight(node_id: &str, key: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    node_id.hash(&mut hasher);
    key.hash(&mut hasher);
    hasher.finish()
}

/// Returns the `from` node ids with the highest weight for `key`, most
/// preferred first. `from` is clamped to the number of available nodes.
pub fn replica_set<'a>(node_ids: &[&'a str], key: &[u8], from: usize) -> Vec<&'a str> {
    let mut scored: Vec<(u64, &str)> = node_ids.iter().map(|&id| (weight(id, key), id)).collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(from.min(node_ids.len()))
        .map(|(_, id)| id)
        .collect()
}
