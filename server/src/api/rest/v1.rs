//! `/api/v1/...` routes (ambient expansion, "REST API surface").

use crate::api::AppState;
use crate::backend::BackendError;
use crate::dispatcher::ServerStats;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cdp_proto::{Block, CompressionKind, FileMeta, Hash, Query as QueryDoc};
use serde::{Deserialize, Serialize};

pub fn v1_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/blocks", post(store_block))
        .route("/api/v1/blocks/needed", post(needed_hashes))
        .route("/api/v1/blocks/:hash", get(retrieve_block))
        .route("/api/v1/filemeta", post(store_filemeta))
        .route("/api/v1/filemeta/:host", get(list_files))
        .route("/api/v1/stats", get(stats))
}

/// §7: error taxonomy maps onto HTTP status. `MissingCapability`/`Config`
/// only occur at startup, before the router exists, so they never reach
/// this conversion in practice.
impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = match &self {
            BackendError::NotFound(_) => StatusCode::NOT_FOUND,
            BackendError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            BackendError::Corrupt(_) => {
                tracing::error!(error = %self, "corrupt block or record");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            BackendError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            BackendError::MissingCapability(_) | BackendError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            BackendError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
struct BlockRequest {
    hash: String,
    payload: String,
    uncompressed_length: u64,
    compression_kind: i32,
}

async fn store_block(
    State(state): State<AppState>,
    Json(req): Json<BlockRequest>,
) -> Result<StatusCode, BackendError> {
    use base64::Engine;
    let hash = Hash::from_hex(&req.hash).map_err(|e| BackendError::Internal(e.to_string()))?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(&req.payload)
        .map_err(|e| BackendError::Internal(e.to_string()))?;
    let block = Block {
        hash,
        payload,
        uncompressed_length: req.uncompressed_length,
        compression_kind: CompressionKind::from_wire(req.compression_kind),
    };
    state.dispatcher.store_block(block).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct NeededHashesRequest {
    hashes: Vec<String>,
}

#[derive(Serialize)]
struct NeededHashesResponse {
    needed: Vec<String>,
}

async fn needed_hashes(
    State(state): State<AppState>,
    Json(req): Json<NeededHashesRequest>,
) -> Result<Json<NeededHashesResponse>, BackendError> {
    let candidates: Vec<Hash> = req
        .hashes
        .iter()
        .map(|s| Hash::from_hex(s).map_err(|e| BackendError::Internal(e.to_string())))
        .collect::<Result<_, _>>()?;
    let needed = state.dispatcher.needed_hashes(&candidates).await?;
    Ok(Json(NeededHashesResponse {
        needed: needed.iter().map(|h| h.to_hex()).collect(),
    }))
}

#[derive(Serialize)]
struct BlockResponse {
    hash: String,
    payload: String,
    uncompressed_length: u64,
    compression_kind: i32,
}

async fn retrieve_block(
    State(state): State<AppState>,
    Path(hash_hex): Path<String>,
) -> Result<Json<BlockResponse>, BackendError> {
    use base64::Engine;
    let hash = Hash::from_hex(&hash_hex).map_err(|e| BackendError::Internal(e.to_string()))?;
    let block = state.dispatcher.retrieve_block(&hash).await?;
    Ok(Json(BlockResponse {
        hash: block.hash.to_hex(),
        payload: base64::engine::general_purpose::STANDARD.encode(&block.payload),
        uncompressed_length: block.uncompressed_length,
        compression_kind: block.compression_kind.to_wire(),
    }))
}

async fn store_filemeta(
    State(state): State<AppState>,
    Json(record): Json<FileMeta>,
) -> Result<StatusCode, BackendError> {
    state.dispatcher.store_filemeta(record).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ListFilesParams {
    filename: Option<String>,
    before_mtime: Option<i64>,
    after_mtime: Option<i64>,
    owner: Option<String>,
    group: Option<String>,
    #[serde(default)]
    latest_only: bool,
}

async fn list_files(
    State(state): State<AppState>,
    Path(host): Path<String>,
    axum::extract::Query(params): axum::extract::Query<ListFilesParams>,
) -> Result<Json<Vec<FileMeta>>, BackendError> {
    let mut query = QueryDoc::new(&host).with_latest_only(params.latest_only);
    if let Some(f) = params.filename {
        query = query.with_filename(f);
    }
    if let Some(b) = params.before_mtime {
        query = query.with_before_mtime(b);
    }
    if let Some(a) = params.after_mtime {
        query = query.with_after_mtime(a);
    }
    query.owner = params.owner;
    query.group = params.group;

    let results = state.dispatcher.list_files(&query).await?;
    Ok(Json(results))
}

async fn stats(State(state): State<AppState>) -> Json<ServerStats> {
    Json(state.dispatcher.stats())
}
