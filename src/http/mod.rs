//! The HTTP surface: `/v0/status`, `/v0/entity`, `/v0/entities`, and the
//! replica-level behavior a proxied request takes instead of fanning
//! out through the [`Coordinator`].

mod chunked;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tracing::warn;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::replication::{Coordinator, ReplicaFactor, EXPIRES_HEADER, PROXY_HEADER, TIMESTAMP_HEADER};

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<Coordinator>,
    engine: Engine,
}

impl AppState {
    pub fn new(coordinator: Coordinator, engine: Engine) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            engine,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v0/status", get(status))
        .route("/v0/entity", get(entity_get).put(entity_put).delete(entity_delete))
        .route("/v0/entities", get(entities_range))
        .with_state(state)
}

async fn status() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct EntityQuery {
    id: Option<String>,
    replicas: Option<String>,
    expires: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

fn is_proxied(headers: &HeaderMap) -> bool {
    headers
        .get(PROXY_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn required_id(id: &Option<String>) -> Result<Vec<u8>, Response> {
    match id {
        Some(id) => Ok(id.clone().into_bytes()),
        None => Err(bad_request("missing required query parameter `id`")),
    }
}

fn bad_request(message: &str) -> Response {
    warn!(message, "rejecting malformed request");
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

fn replica_factor(
    coordinator: &Coordinator,
    replicas: &Option<String>,
) -> Result<ReplicaFactor, Response> {
    match replicas {
        Some(s) => coordinator
            .parse_factor(s)
            .map_err(IntoResponse::into_response),
        None => Ok(coordinator.default_factor()),
    }
}

/// Parses an absolute expiration instant, preferring the internal
/// `X-Expires` header (set by a coordinator on a proxied write) over
/// the client-facing `expires` query parameter.
fn resolve_expire(headers: &HeaderMap, query_expires: &Option<String>) -> Result<Option<i64>, Response> {
    let raw = headers
        .get(EXPIRES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .or_else(|| query_expires.clone());

    let Some(raw) = raw else {
        return Ok(None);
    };
    match httpdate::parse_http_date(&raw) {
        Ok(time) => {
            let nanos = time
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
            Ok(Some(nanos))
        }
        Err(_) => Err(bad_request("malformed expires date, expected RFC1123-GMT")),
    }
}

async fn local_peek(engine: Engine, key: Vec<u8>) -> Result<Option<crate::cell::Cell>, EngineError> {
    tokio::task::spawn_blocking(move || engine.peek(&key))
        .await
        .map_err(|_| EngineError::Interrupted)?
}

async fn local_upsert(
    engine: Engine,
    key: Vec<u8>,
    value: Vec<u8>,
    expire: Option<i64>,
) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || engine.upsert(key, value, expire))
        .await
        .map_err(|_| EngineError::Interrupted)?
}

async fn local_remove(engine: Engine, key: Vec<u8>) -> Result<(), EngineError> {
    tokio::task::spawn_blocking(move || engine.remove(key))
        .await
        .map_err(|_| EngineError::Interrupted)?
}

fn with_timestamp(mut response: Response, timestamp: i64) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static("timestamp"),
        HeaderValue::from_str(&timestamp.to_string()).expect("decimal timestamp is valid header value"),
    );
    response
}

async fn entity_get(
    State(state): State<AppState>,
    Query(params): Query<EntityQuery>,
    headers: HeaderMap,
) -> Response {
    let key = match required_id(&params.id) {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    if is_proxied(&headers) {
        return match local_peek(state.engine.clone(), key).await {
            Ok(Some(cell)) => match cell.value {
                Some(value) => with_timestamp((StatusCode::OK, value).into_response(), cell.timestamp),
                None => with_timestamp(StatusCode::NOT_FOUND.into_response(), cell.timestamp),
            },
            Ok(None) => StatusCode::NOT_FOUND.into_response(),
            Err(e) => e.into_response(),
        };
    }

    let factor = match replica_factor(&state.coordinator, &params.replicas) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match state.coordinator.get(&key, factor).await {
        Ok(value) => value.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn entity_put(
    State(state): State<AppState>,
    Query(params): Query<EntityQuery>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let key = match required_id(&params.id) {
        Ok(key) => key,
        Err(resp) => return resp,
    };
    let expire = match resolve_expire(&headers, &params.expires) {
        Ok(e) => e,
        Err(resp) => return resp,
    };
    let value = body.to_vec();

    if is_proxied(&headers) {
        return match local_upsert(state.engine.clone(), key, value, expire).await {
            Ok(()) => StatusCode::CREATED.into_response(),
            Err(e) => e.into_response(),
        };
    }

    let factor = match replica_factor(&state.coordinator, &params.replicas) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match state.coordinator.put(&key, value, expire, factor).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn entity_delete(
    State(state): State<AppState>,
    Query(params): Query<EntityQuery>,
    headers: HeaderMap,
) -> Response {
    let key = match required_id(&params.id) {
        Ok(key) => key,
        Err(resp) => return resp,
    };

    if is_proxied(&headers) {
        return match local_remove(state.engine.clone(), key).await {
            Ok(()) => StatusCode::ACCEPTED.into_response(),
            Err(e) => e.into_response(),
        };
    }

    let factor = match replica_factor(&state.coordinator, &params.replicas) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match state.coordinator.delete(&key, factor).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn entities_range(State(state): State<AppState>, Query(params): Query<RangeQuery>) -> Response {
    let start = params.start.unwrap_or_default().into_bytes();
    let end = params.end.map(String::into_bytes);
    let body = chunked::range_body(state.engine.clone(), start, end);
    Response::builder()
        .status(StatusCode::OK)
        .body(body)
        .expect("a streamed body always produces a well-formed response")
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::Io(_) | EngineError::SSTable(_) | EngineError::Interrupted | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self, "engine error surfaced to http response");
        }
        (status, self.to_string()).into_response()
    }
}

impl IntoResponse for crate::error::CoordinatorError {
    fn into_response(self) -> Response {
        use crate::error::CoordinatorError as E;
        let status = match &self {
            E::NotFound => StatusCode::NOT_FOUND,
            E::BadRequest(_) => StatusCode::BAD_REQUEST,
            E::QuorumFailed { .. } => StatusCode::GATEWAY_TIMEOUT,
            E::Engine(_) | E::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self, "coordinator error surfaced to http response");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, EngineConfig};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), EngineConfig::default()).unwrap();
        let cluster = ClusterConfig::single_node("a", "http://127.0.0.1:9999");
        let coordinator = Coordinator::new(cluster, engine.clone());
        (router(AppState::new(coordinator, engine)), dir)
    }

    #[tokio::test]
    async fn status_is_ok() {
        let (app, _dir) = test_router();
        let response = app
            .oneshot(Request::builder().uri("/v0/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let (app, _dir) = test_router();
        let put = Request::builder()
            .method("PUT")
            .uri("/v0/entity?id=a")
            .body(Body::from("1"))
            .unwrap();
        let response = app.clone().oneshot(put).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let get = Request::builder().uri("/v0/entity?id=a").body(Body::empty()).unwrap();
        let response = app.oneshot(get).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"1");
    }

    #[tokio::test]
    async fn get_missing_id_is_bad_request() {
        let (app, _dir) = test_router();
        let response = app
            .oneshot(Request::builder().uri("/v0/entity").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let (app, _dir) = test_router();
        let response = app
            .oneshot(Request::builder().uri("/v0/entity?id=missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v0/entity?id=a")
                    .body(Body::from("1"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let response = app
            .clone()
            .oneshot(Request::builder().method("DELETE").uri("/v0/entity?id=a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let response = app
            .oneshot(Request::builder().uri("/v0/entity?id=a").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn range_scan_streams_chunked_records_excluding_end() {
        let (app, _dir) = test_router();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3")] {
            app.clone()
                .oneshot(
                    Request::builder()
                        .method("PUT")
                        .uri(format!("/v0/entity?id={k}"))
                        .body(Body::from(v))
                        .unwrap(),
                )
                .await
                .unwrap();
        }
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v0/entities?start=a&end=c")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"a\n1b\n2");
    }

    #[tokio::test]
    async fn proxied_get_carries_timestamp_header() {
        let (app, _dir) = test_router();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v0/entity?id=a")
                    .body(Body::from("1"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v0/entity?id=a")
                    .header(PROXY_HEADER, "True")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(TIMESTAMP_HEADER.to_lowercase()));
    }
}
