//! Multi-node cluster integration tests.
//!
//! Unlike the single-process, `tower::oneshot`-driven router tests in
//! `src/http/mod.rs`, these tests bind real TCP listeners for several
//! nodes and drive them with a real `reqwest` client, exercising the
//! rendezvous replica selection, quorum fan-out, and proxied dispatch
//! end to end across process-external HTTP calls.

use std::collections::BTreeMap;
use std::time::Duration;

use custodiadb::config::{ClusterConfig, EngineConfig};
use custodiadb::engine::Engine;
use custodiadb::http::{router, AppState};
use custodiadb::replication::Coordinator;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Node {
    id: String,
    base_url: String,
    engine: Engine,
    _dir: TempDir,
    handle: JoinHandle<()>,
}

impl Node {
    fn abort(&self) {
        self.handle.abort();
    }
}

/// Binds `count` listeners up front (so every node's base URL is known),
/// then spawns each node's full HTTP stack wired to the same cluster
/// topology.
async fn spawn_cluster(count: usize, ack: usize, from: usize) -> Vec<Node> {
    let mut listeners = Vec::new();
    let mut nodes = BTreeMap::new();
    for i in 0..count {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let id = format!("n{i}");
        nodes.insert(id.clone(), format!("http://{addr}"));
        listeners.push((id, listener));
    }

    let mut out = Vec::new();
    for (id, listener) in listeners {
        let cluster = ClusterConfig {
            self_id: id.clone(),
            nodes: nodes.clone(),
            ack,
            from,
        };
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        let coordinator = Coordinator::new(cluster, engine.clone());
        let app = router(AppState::new(coordinator, engine.clone()));
        let base_url = nodes[&id].clone();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        out.push(Node {
            id,
            base_url,
            engine,
            _dir: dir,
            handle,
        });
    }

    // Give the spawned servers a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    out
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

#[tokio::test]
async fn status_reachable_on_every_node() {
    let cluster = spawn_cluster(3, 1, 1).await;
    let client = client();
    for node in &cluster {
        let resp = client
            .get(format!("{}/v0/status", node.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK, "node {} unreachable", node.id);
    }
}

#[tokio::test]
async fn write_on_one_node_is_visible_from_another_via_quorum() {
    let cluster = spawn_cluster(3, 2, 3).await;
    let client = client();

    let put = client
        .put(format!("{}/v0/entity?id=shared-key", cluster[0].base_url))
        .body("shared-value")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), reqwest::StatusCode::CREATED);

    // Read through every node; rendezvous hashing means the same
    // replica set answers regardless of which node receives the
    // client request.
    for node in &cluster {
        let get = client
            .get(format!("{}/v0/entity?id=shared-key", node.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(get.status(), reqwest::StatusCode::OK, "node {} missing the write", node.id);
        let body = get.text().await.unwrap();
        assert_eq!(body, "shared-value");
    }
}

#[tokio::test]
async fn delete_propagates_through_quorum() {
    let cluster = spawn_cluster(3, 2, 3).await;
    let client = client();

    client
        .put(format!("{}/v0/entity?id=gone-soon", cluster[0].base_url))
        .body("temp")
        .send()
        .await
        .unwrap();

    let delete = client
        .delete(format!("{}/v0/entity?id=gone-soon", cluster[1].base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), reqwest::StatusCode::ACCEPTED);

    let get = client
        .get(format!("{}/v0/entity?id=gone-soon", cluster[2].base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(get.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn quorum_write_fails_when_too_many_replicas_are_unreachable() {
    // ack == from == 3: every replica must acknowledge. Killing one
    // node's listener makes that unreachable and the write must fail.
    let cluster = spawn_cluster(3, 3, 3).await;
    cluster[2].abort();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = client();
    let put = client
        .put(format!("{}/v0/entity?id=k", cluster[0].base_url))
        .body("v")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn quorum_write_tolerates_a_minority_of_unreachable_replicas() {
    // ack=2/from=3: one unreachable replica still leaves a quorum of two.
    let cluster = spawn_cluster(3, 2, 3).await;
    cluster[2].abort();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = client();
    let put = client
        .put(format!("{}/v0/entity?id=k", cluster[0].base_url))
        .body("v")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), reqwest::StatusCode::CREATED);
}

#[tokio::test]
async fn explicit_replica_factor_overrides_default() {
    let cluster = spawn_cluster(3, 2, 3).await;
    let client = client();

    // default factor is 2/3; ask for 1/1 instead (single-replica write).
    let put = client
        .put(format!("{}/v0/entity?id=k&replicas=1/1", cluster[0].base_url))
        .body("v")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), reqwest::StatusCode::CREATED);
}

#[tokio::test]
async fn malformed_replica_factor_is_bad_request() {
    let cluster = spawn_cluster(3, 2, 3).await;
    let client = client();

    let put = client
        .put(format!("{}/v0/entity?id=k&replicas=not-a-factor", cluster[0].base_url))
        .body("v")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn range_scan_is_local_only_and_reflects_direct_writes() {
    let cluster = spawn_cluster(2, 1, 1).await;

    // Range scans bypass the coordinator entirely, so write straight to
    // the node's engine and confirm the node's own `/v0/entities`
    // reflects it without needing any peer to be up.
    cluster[0]
        .engine
        .upsert(b"r1".to_vec(), b"v1".to_vec(), None)
        .unwrap();
    cluster[0]
        .engine
        .upsert(b"r2".to_vec(), b"v2".to_vec(), None)
        .unwrap();

    let client = client();
    let resp = client
        .get(format!("{}/v0/entities?start=r1", cluster[0].base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body = resp.text().await.unwrap();
    assert_eq!(body, "r1\nv1r2\nv2");
}
