//! The replication coordinator: fans a client request out to `from`
//! replicas chosen by rendezvous hashing, and assembles quorum.

mod hash;
mod peer;

pub use peer::{
    format_expire, LocalPeer, PeerClient, PeerGetResult, PeerOutcome, RemotePeer, EXPIRES_HEADER,
    PROXY_HEADER, TIMESTAMP_HEADER,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use crate::config::ClusterConfig;
use crate::engine::Engine;
use crate::error::CoordinatorError;

/// A parsed `ack/from` replica factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaFactor {
    pub ack: usize,
    pub from: usize,
}

impl ReplicaFactor {
    pub fn parse(s: &str, node_count: usize) -> Result<Self, CoordinatorError> {
        let (ack_str, from_str) = s
            .split_once('/')
            .ok_or_else(|| CoordinatorError::BadRequest(format!("malformed replica factor {s:?}")))?;
        let ack: usize = ack_str
            .parse()
            .map_err(|_| CoordinatorError::BadRequest(format!("malformed replica factor {s:?}")))?;
        let from: usize = from_str
            .parse()
            .map_err(|_| CoordinatorError::BadRequest(format!("malformed replica factor {s:?}")))?;
        if ack == 0 || ack > from || from > node_count {
            return Err(CoordinatorError::BadRequest(format!(
                "replica factor {ack}/{from} invalid for a {node_count}-node cluster"
            )));
        }
        Ok(Self { ack, from })
    }
}

pub struct Coordinator {
    cluster: ClusterConfig,
    dispatch: BTreeMap<String, Arc<dyn PeerClient>>,
}

impl Coordinator {
    /// Builds a coordinator for `cluster`, dispatching to `engine`
    /// locally for `cluster.self_id` and to `RemotePeer`s for every
    /// other node. Every dispatch target — local or remote — goes
    /// through the same `PeerClient` trait object, so quorum accounting
    /// never special-cases the local node.
    pub fn new(cluster: ClusterConfig, engine: Engine) -> Self {
        let mut dispatch: BTreeMap<String, Arc<dyn PeerClient>> = BTreeMap::new();
        for (id, base_url) in &cluster.nodes {
            let peer: Arc<dyn PeerClient> = if *id == cluster.self_id {
                Arc::new(LocalPeer::new(engine.clone()))
            } else {
                Arc::new(RemotePeer::new(base_url.clone()))
            };
            dispatch.insert(id.clone(), peer);
        }
        Self { cluster, dispatch }
    }

    pub fn default_factor(&self) -> ReplicaFactor {
        ReplicaFactor {
            ack: self.cluster.ack,
            from: self.cluster.from,
        }
    }

    pub fn parse_factor(&self, s: &str) -> Result<ReplicaFactor, CoordinatorError> {
        ReplicaFactor::parse(s, self.cluster.nodes.len())
    }

    fn select_replicas(&self, key: &[u8], from: usize) -> Vec<String> {
        let node_ids = self.cluster.node_ids();
        hash::replica_set(&node_ids, key, from)
            .into_iter()
            .map(str::to_owned)
            .collect()
    }

    fn peer(&self, id: &str) -> Arc<dyn PeerClient> {
        self.dispatch
            .get(id)
            .expect("replica id returned by select_replicas must be dispatchable")
            .clone()
    }

    /// Reads `key` with quorum: waits for the first `ack` non-unreachable
    /// responses among `from` replicas, then resolves the freshest one.
    pub async fn get(&self, key: &[u8], factor: ReplicaFactor) -> Result<Vec<u8>, CoordinatorError> {
        let replicas = self.select_replicas(key, factor.from);
        debug!(replicas = ?replicas, "dispatching quorum read");

        let mut pending = FuturesUnordered::new();
        for id in &replicas {
            let peer = self.peer(id);
            let key = key.to_vec();
            pending.push(async move { peer.get(&key).await });
        }

        let mut responded = Vec::new();
        while responded.len() < factor.ack {
            match pending.next().await {
                Some(PeerGetResult::Unreachable) => continue,
                Some(result) => responded.push(result),
                None => break,
            }
        }

        if responded.len() < factor.ack {
            return Err(CoordinatorError::QuorumFailed {
                ack: factor.ack,
                from: factor.from,
            });
        }

        let freshest = responded
            .into_iter()
            .max_by_key(|r| match r {
                PeerGetResult::Present { timestamp, .. } => *timestamp,
                PeerGetResult::Removed { timestamp } => *timestamp,
                PeerGetResult::Absent | PeerGetResult::Unreachable => i64::MIN,
            })
            .expect("responded has at least `ack >= 1` entries");

        match freshest {
            PeerGetResult::Present { value, .. } => Ok(value),
            _ => Err(CoordinatorError::NotFound),
        }
    }

    /// Writes `key`/`value` with quorum: dispatches to `from` replicas
    /// and succeeds once `ack` of them acknowledge.
    pub async fn put(
        &self,
        key: &[u8],
        value: Vec<u8>,
        expire: Option<i64>,
        factor: ReplicaFactor,
    ) -> Result<(), CoordinatorError> {
        let replicas = self.select_replicas(key, factor.from);
        let mut pending = FuturesUnordered::new();
        for id in &replicas {
            let peer = self.peer(id);
            let key = key.to_vec();
            let value = value.clone();
            pending.push(async move { peer.put(&key, value, expire).await });
        }

        let mut acks = 0;
        while let Some(outcome) = pending.next().await {
            if outcome == PeerOutcome::Ack {
                acks += 1;
            }
        }

        if acks >= factor.ack {
            Ok(())
        } else {
            Err(CoordinatorError::QuorumFailed {
                ack: factor.ack,
                from: factor.from,
            })
        }
    }

    /// Deletes `key` with quorum, identical shape to [`Coordinator::put`].
    pub async fn delete(&self, key: &[u8], factor: ReplicaFactor) -> Result<(), CoordinatorError> {
        let replicas = self.select_replicas(key, factor.from);
        let mut pending = FuturesUnordered::new();
        for id in &replicas {
            let peer = self.peer(id);
            let key = key.to_vec();
            pending.push(async move { peer.delete(&key).await });
        }

        let mut acks = 0;
        while let Some(outcome) = pending.next().await {
            if outcome == PeerOutcome::Ack {
                acks += 1;
            }
        }

        if acks >= factor.ack {
            Ok(())
        } else {
            Err(CoordinatorError::QuorumFailed {
                ack: factor.ack,
                from: factor.from,
            })
        }
    }
}
