//! The wire/peer client: dispatches a single-key operation either to the
//! local engine or to a remote node over HTTP, behind one trait so the
//! coordinator's fan-out never needs to special-case "is this me?".

use std::time::Duration;

use async_trait::async_trait;

use crate::engine::Engine;

/// Header marking a request as already being serviced on behalf of a
/// coordinator; the receiver must not fan it out further.
pub const PROXY_HEADER: &str = "X-Proxy-For";
/// Carries a cell's logical timestamp on replica responses.
pub const TIMESTAMP_HEADER: &str = "Timestamp";
/// Carries a PUT/DELETE's absolute expiration instant, RFC1123-GMT.
pub const EXPIRES_HEADER: &str = "X-Expires";

/// The default per-request deadline for a peer dispatch.
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_millis(1000);

/// The outcome of dispatching a GET to one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerGetResult {
    Present { timestamp: i64, value: Vec<u8> },
    Removed { timestamp: i64 },
    Absent,
    /// Timed out, or a transport/parse error occurred. Counted as "did
    /// not respond" for quorum purposes, never as a negative answer.
    Unreachable,
}

/// The outcome of dispatching a PUT or DELETE to one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOutcome {
    Ack,
    Unreachable,
}

/// One replica's dispatch surface, implemented identically for the local
/// node (direct engine call) and for remote peers (HTTP over the wire).
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn get(&self, key: &[u8]) -> PeerGetResult;
    async fn put(&self, key: &[u8], value: Vec<u8>, expire: Option<i64>) -> PeerOutcome;
    async fn delete(&self, key: &[u8]) -> PeerOutcome;
}

/// Dispatches to this node's own engine, bypassing HTTP entirely.
pub struct LocalPeer {
    engine: Engine,
}

impl LocalPeer {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl PeerClient for LocalPeer {
    async fn get(&self, key: &[u8]) -> PeerGetResult {
        let engine = self.engine.clone();
        let key = key.to_vec();
        let result = tokio::task::spawn_blocking(move || engine.peek(&key)).await;
        match result {
            Ok(Ok(Some(cell))) => match cell.value {
                Some(value) => PeerGetResult::Present {
                    timestamp: cell.timestamp,
                    value,
                },
                None => PeerGetResult::Removed {
                    timestamp: cell.timestamp,
                },
            },
            Ok(Ok(None)) => PeerGetResult::Absent,
            _ => PeerGetResult::Unreachable,
        }
    }

    async fn put(&self, key: &[u8], value: Vec<u8>, expire: Option<i64>) -> PeerOutcome {
        let engine = self.engine.clone();
        let key = key.to_vec();
        let result = tokio::task::spawn_blocking(move || engine.upsert(key, value, expire)).await;
        match result {
            Ok(Ok(())) => PeerOutcome::Ack,
            _ => PeerOutcome::Unreachable,
        }
    }

    async fn delete(&self, key: &[u8]) -> PeerOutcome {
        let engine = self.engine.clone();
        let key = key.to_vec();
        let result = tokio::task::spawn_blocking(move || engine.remove(key)).await;
        match result {
            Ok(Ok(())) => PeerOutcome::Ack,
            _ => PeerOutcome::Unreachable,
        }
    }
}

/// Dispatches to a remote node's `/v0/entity` endpoint, marking every
/// request as proxied so the remote node never fans out further.
pub struct RemotePeer {
    client: reqwest::Client,
    base_url: String,
}

impl RemotePeer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_PEER_TIMEOUT)
                .build()
                .expect("reqwest client configuration is valid"),
            base_url: base_url.into(),
        }
    }

    fn entity_url(&self) -> String {
        format!("{}/v0/entity", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PeerClient for RemotePeer {
    async fn get(&self, key: &[u8]) -> PeerGetResult {
        let id = String::from_utf8_lossy(key).into_owned();
        let response = self
            .client
            .get(self.entity_url())
            .query(&[("id", id.as_str())])
            .header(PROXY_HEADER, "True")
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(_) => return PeerGetResult::Unreachable,
        };

        let timestamp = response
            .headers()
            .get(TIMESTAMP_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());

        let status = response.status();
        if status.is_success() {
            let Some(timestamp) = timestamp else {
                return PeerGetResult::Unreachable;
            };
            match response.bytes().await {
                Ok(body) => PeerGetResult::Present {
                    timestamp,
                    value: body.to_vec(),
                },
                Err(_) => PeerGetResult::Unreachable,
            }
        } else if status == reqwest::StatusCode::NOT_FOUND {
            match timestamp {
                Some(timestamp) => PeerGetResult::Removed { timestamp },
                None => PeerGetResult::Absent,
            }
        } else {
            PeerGetResult::Unreachable
        }
    }

    async fn put(&self, key: &[u8], value: Vec<u8>, expire: Option<i64>) -> PeerOutcome {
        let id = String::from_utf8_lossy(key).into_owned();
        let mut request = self
            .client
            .put(self.entity_url())
            .query(&[("id", id.as_str())])
            .header(PROXY_HEADER, "True")
            .body(value);

        if let Some(expire) = expire {
            request = request.header(EXPIRES_HEADER, format_expire(expire));
        }

        match request.send().await {
            Ok(r) if r.status().is_success() => PeerOutcome::Ack,
            _ => PeerOutcome::Unreachable,
        }
    }

    async fn delete(&self, key: &[u8]) -> PeerOutcome {
        let id = String::from_utf8_lossy(key).into_owned();
        let result = self
            .client
            .delete(self.entity_url())
            .query(&[("id", id.as_str())])
            .header(PROXY_HEADER, "True")
            .send()
            .await;

        match result {
            Ok(r) if r.status().is_success() => PeerOutcome::Ack,
            _ => PeerOutcome::Unreachable,
        }
    }
}

/// Formats an absolute nanosecond instant as an RFC1123-GMT date, the
/// format `X-Expires` carries on the wire.
pub fn format_expire(expire_nanos: i64) -> String {
    let secs = expire_nanos.div_euclid(1_000_000_000);
    let time = std::time::UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
    httpdate::fmt_http_date(time)
}
