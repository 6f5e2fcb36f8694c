//! HTTP/JSON surface over the partitioned IVF index (component F — the
//! RPC/CLI boundary; not part of the core).
//!
//! The core contract (`§6`) is metric-neutral about wire format; this layer
//! marshals JSON over HTTP rather than a binary RPC because that is the
//! idiom this workspace's API layer already uses elsewhere.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use ivf_core::{Error as CoreError, Index, Record, ScoredRecord};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

/// Shared state behind every handler: the index plus the metric/probe
/// defaults a request may omit.
#[derive(Clone)]
struct AppState {
    index: Arc<Index>,
    default_metric: String,
    default_probes: usize,
}

/// High-level API server wrapper owning the shared index.
#[derive(Clone)]
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(index: Arc<Index>) -> Self {
        Self::with_defaults(index, "l2", 1)
    }

    /// Construct with explicit metric/probe defaults, as loaded from
    /// [`ivf_config::ServiceConfig`].
    pub fn with_defaults(index: Arc<Index>, default_metric: impl Into<String>, default_probes: usize) -> Self {
        Self {
            state: AppState {
                index,
                default_metric: default_metric.into(),
                default_probes,
            },
        }
    }

    pub fn index(&self) -> Arc<Index> {
        self.state.index.clone()
    }

    pub fn router(&self) -> Router<()> {
        Router::new()
            .route("/v1/records", post(handle_insert))
            .route("/v1/records/:uuid", get(handle_fetch))
            .route("/v1/records/:uuid", delete(handle_delete))
            .route("/v1/query", post(handle_query))
            .route("/v1/reindex", post(handle_reindex))
            .route("/metrics", get(handle_metrics))
            .with_state(self.state.clone())
    }

    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "ivf-api listening");
        axum::serve(listener, self.router().into_make_service()).await?;
        Ok(())
    }
}

fn record_route_counter(route: &'static str, status: StatusCode) {
    counter!(
        "ivf_api_requests_total",
        1,
        "route" => route,
        "status" => status.as_u16().to_string()
    );
}

async fn handle_insert(
    State(state): State<AppState>,
    Json(payload): Json<InsertPayload>,
) -> Result<Json<InsertResponse>, ApiError> {
    const ROUTE: &str = "insert";
    let uuid = payload.uuid.unwrap_or_else(|| Uuid::new_v4().to_string());
    let record = Record::new(uuid.clone(), payload.data, payload.meta.unwrap_or_default());

    let index = state.index.clone();
    let result = tokio::task::spawn_blocking(move || index.insert(record))
        .await
        .map_err(|err| ApiError::internal(format!("insert task panicked: {err}")))?;

    let response = result.map(|_| InsertResponse {
        uuid,
        success: true,
    });
    respond(ROUTE, response)
}

async fn handle_fetch(
    Path(uuid): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<FetchResponse>, ApiError> {
    const ROUTE: &str = "fetch";
    let result = state.index.fetch(&uuid).map(|record| FetchResponse {
        uuid: record.uuid,
        meta: record.meta,
    });
    respond(ROUTE, result)
}

async fn handle_delete(
    Path(uuid): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DeleteResponse>, ApiError> {
    const ROUTE: &str = "delete";
    let success = state.index.delete(&uuid);
    respond(ROUTE, Ok(DeleteResponse { uuid, success }))
}

async fn handle_query(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<QueryResponse>, ApiError> {
    const ROUTE: &str = "query";
    let QueryPayload {
        data,
        limit,
        probes,
        metric,
    } = payload;
    let metric = metric.unwrap_or(state.default_metric);
    let probes = probes.unwrap_or(state.default_probes);

    let index = state.index.clone();
    let result = tokio::task::spawn_blocking(move || index.query(&data, limit, probes, &metric, None))
        .await
        .map_err(|err| ApiError::internal(format!("query task panicked: {err}")))?;

    let response = result.map(|hits| QueryResponse {
        results: hits.into_iter().map(|hit| hit.map(ResultEntry::from)).collect(),
    });
    respond(ROUTE, response)
}

async fn handle_reindex(
    State(state): State<AppState>,
    Json(payload): Json<ReindexPayload>,
) -> Result<Json<ReindexResponse>, ApiError> {
    const ROUTE: &str = "reindex";
    let metric = payload.metric.unwrap_or(state.default_metric);

    let index = state.index.clone();
    let result = tokio::task::spawn_blocking(move || index.reindex(&metric, None))
        .await
        .map_err(|err| ApiError::internal(format!("reindex task panicked: {err}")))?;

    respond(ROUTE, result.map(|_| ReindexResponse { success: true }))
}

async fn handle_metrics() -> Result<impl IntoResponse, ApiError> {
    let body = ivf_metrics::gather().map_err(|err| ApiError::internal(err.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Turn a core result into an HTTP response, incrementing the per-route
/// request counter with the resulting status either way.
fn respond<T>(route: &'static str, result: Result<T, CoreError>) -> Result<Json<T>, ApiError> {
    match result {
        Ok(value) => {
            record_route_counter(route, StatusCode::OK);
            Ok(Json(value))
        }
        Err(err) => {
            let api_err: ApiError = err.into();
            record_route_counter(route, api_err.status);
            Err(api_err)
        }
    }
}

#[derive(Debug, Deserialize)]
struct InsertPayload {
    #[serde(default)]
    uuid: Option<String>,
    data: Vec<f64>,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
struct InsertResponse {
    uuid: String,
    success: bool,
}

#[derive(Debug, Serialize)]
struct FetchResponse {
    uuid: String,
    meta: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    uuid: String,
    success: bool,
}

#[derive(Debug, Deserialize)]
struct QueryPayload {
    data: Vec<f64>,
    limit: usize,
    #[serde(default)]
    probes: Option<usize>,
    #[serde(default)]
    metric: Option<String>,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    results: Vec<Option<ResultEntry>>,
}

#[derive(Debug, Serialize)]
struct ResultEntry {
    uuid: String,
    data: Vec<f64>,
    meta: HashMap<String, String>,
    score: f64,
}

impl From<ScoredRecord> for ResultEntry {
    fn from(hit: ScoredRecord) -> Self {
        Self {
            uuid: hit.record.uuid,
            data: hit.record.data,
            meta: hit.record.meta,
            score: hit.score,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReindexPayload {
    #[serde(default)]
    metric: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReindexResponse {
    success: bool,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT),
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use ivf_core::MetricRegistry;
    use tower::ServiceExt;

    fn server() -> ApiServer {
        let index = Index::new(2, 2, MetricRegistry::with_defaults()).unwrap();
        ApiServer::new(Arc::new(index))
    }

    async fn send(router: Router<()>, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn insert_then_fetch_round_trips() {
        let router = server().router();
        let (status, body) = send(
            router.clone(),
            "POST",
            "/v1/records",
            serde_json::json!({"uuid": "a", "data": [1.0, 2.0]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(router, "GET", "/v1/records/a", serde_json::Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uuid"], "a");
    }

    #[tokio::test]
    async fn fetch_missing_returns_404() {
        let router = server().router();
        let (status, _) = send(router, "GET", "/v1/records/missing", serde_json::Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn query_unknown_metric_returns_400() {
        let router = server().router();
        let (status, _) = send(
            router,
            "POST",
            "/v1/query",
            serde_json::json!({"data": [0.0, 0.0], "limit": 1, "metric": "cosine"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reindex_empty_index_returns_500() {
        let router = server().router();
        let (status, _) = send(router, "POST", "/v1/reindex", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
