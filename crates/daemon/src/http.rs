//! Versioned HTTP API (§6). One handler per endpoint, each a thin adapter
//! between an axum extractor and a [`QueryService`]/[`DownloadUrlSigner`]
//! call; the response shape is already decided by `query::*` result types.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::error::DaemonError;
use crate::lifecycle::Daemon;

pub fn router(daemon: Arc<Daemon>) -> Router {
  Router::new()
    .route("/api/v1/health", get(health))
    .route("/api/v1/server/info", get(server_info))
    .route("/api/v1/folders", get(list_folders))
    .route("/api/v1/folders/:folder_path/explore", get(explore))
    .route("/api/v1/folders/:folder_path/documents", get(list_documents))
    .route("/api/v1/folders/:folder_path/documents/:file/metadata", get(document_metadata))
    .route("/api/v1/folders/:folder_path/documents/:file/chunks", post(get_chunks))
    .route("/api/v1/folders/:folder_path/documents/:file/text", get(document_text))
    .route("/api/v1/folders/:folder_path/search_content", post(search_content))
    .route("/api/v1/folders/:folder_path/find-documents", post(find_documents))
    .route("/api/v1/download", get(download))
    .with_state(daemon)
}

/// Requests arrive with `folder_path`/`file` percent-encoded into a single
/// path segment (absolute filesystem paths contain `/`, which an ordinary
/// axum path parameter can't span).
fn decode_segment(raw: &str) -> Result<String, DaemonError> {
  percent_decode_str(raw)
    .decode_utf8()
    .map(|s| s.into_owned())
    .map_err(|e| DaemonError::BadRequest(format!("invalid path segment: {e}")))
}

fn touch(daemon: &Daemon) {
  daemon.touch_activity();
}

async fn health() -> &'static str {
  "ok"
}

#[derive(Serialize)]
struct ServerInfo {
  pid: u32,
  uptime_secs: u64,
  version: String,
}

async fn server_info(State(daemon): State<Arc<Daemon>>) -> Json<ServerInfo> {
  touch(&daemon);
  let snapshot = daemon.fmdm.snapshot();
  Json(ServerInfo { pid: snapshot.daemon.pid, uptime_secs: snapshot.daemon.uptime_secs, version: snapshot.daemon.version.clone() })
}

async fn list_folders(State(daemon): State<Arc<Daemon>>) -> Response {
  touch(&daemon);
  Json(daemon.query.list_folders().await).into_response()
}

#[derive(Deserialize)]
struct PageParams {
  cursor: Option<String>,
  #[serde(default = "default_limit")]
  limit: usize,
}

fn default_limit() -> usize {
  50
}

#[derive(Deserialize)]
struct ExploreParams {
  sub_path: Option<String>,
  cursor: Option<String>,
  #[serde(default = "default_limit")]
  limit: usize,
}

async fn explore(State(daemon): State<Arc<Daemon>>, Path(folder_path): Path<String>, Query(params): Query<ExploreParams>) -> Response {
  touch(&daemon);
  respond(&folder_path, async {
    let folder_path = decode_segment(&folder_path)?;
    daemon.query.explore(&folder_path, params.sub_path.as_deref(), params.cursor.as_deref(), params.limit).await
  })
  .await
}

#[derive(Deserialize)]
struct ListDocumentsParams {
  sub_path: Option<String>,
  #[serde(default)]
  recursive: bool,
  cursor: Option<String>,
  #[serde(default = "default_limit")]
  limit: usize,
}

async fn list_documents(State(daemon): State<Arc<Daemon>>, Path(folder_path): Path<String>, Query(params): Query<ListDocumentsParams>) -> Response {
  touch(&daemon);
  respond(&folder_path, async {
    let folder_path = decode_segment(&folder_path)?;
    daemon.query.list_documents(&folder_path, params.sub_path.as_deref(), params.recursive, params.cursor.as_deref(), params.limit).await
  })
  .await
}

async fn document_metadata(State(daemon): State<Arc<Daemon>>, Path((folder_path, file)): Path<(String, String)>, Query(params): Query<PageParams>) -> Response {
  touch(&daemon);
  respond(&folder_path, async {
    let folder_path = decode_segment(&folder_path)?;
    let file = decode_segment(&file)?;
    daemon.query.document_metadata(&folder_path, &file, params.cursor.as_deref(), params.limit).await
  })
  .await
}

#[derive(Deserialize)]
struct ChunksRequest {
  chunk_ids: Vec<String>,
}

async fn get_chunks(State(daemon): State<Arc<Daemon>>, Path((folder_path, file)): Path<(String, String)>, Json(body): Json<ChunksRequest>) -> Response {
  touch(&daemon);
  respond(&folder_path, async {
    let folder_path = decode_segment(&folder_path)?;
    let file = decode_segment(&file)?;
    daemon.query.get_chunks(&folder_path, &file, &body.chunk_ids).await
  })
  .await
}

#[derive(Deserialize)]
struct TextParams {
  #[serde(default = "default_max_chars")]
  max_chars: usize,
  #[serde(default)]
  offset: usize,
}

fn default_max_chars() -> usize {
  5_000
}

async fn document_text(State(daemon): State<Arc<Daemon>>, Path((folder_path, file)): Path<(String, String)>, Query(params): Query<TextParams>) -> Response {
  touch(&daemon);
  respond(&folder_path, async {
    let folder_path = decode_segment(&folder_path)?;
    let file = decode_segment(&file)?;
    daemon.query.document_text(&folder_path, &file, params.max_chars, params.offset).await
  })
  .await
}

#[derive(Deserialize)]
struct SearchContentRequest {
  semantic_concepts: Option<Vec<String>>,
  exact_terms: Option<Vec<String>>,
  min_score: Option<f64>,
  #[serde(default = "default_limit")]
  limit: usize,
}

async fn search_content(State(daemon): State<Arc<Daemon>>, Path(folder_path): Path<String>, Json(body): Json<SearchContentRequest>) -> Response {
  touch(&daemon);
  respond(&folder_path, async {
    let folder_path = decode_segment(&folder_path)?;
    daemon
      .query
      .search_content(&folder_path, body.semantic_concepts.as_deref(), body.exact_terms.as_deref(), body.min_score, body.limit)
      .await
  })
  .await
}

#[derive(Deserialize)]
struct FindDocumentsRequest {
  query: String,
  #[serde(default = "default_limit")]
  limit: usize,
}

async fn find_documents(State(daemon): State<Arc<Daemon>>, Path(folder_path): Path<String>, Json(body): Json<FindDocumentsRequest>) -> Response {
  touch(&daemon);
  respond(&folder_path, async {
    let folder_path = decode_segment(&folder_path)?;
    daemon.query.find_documents(&folder_path, &body.query, body.limit).await
  })
  .await
}

#[derive(Deserialize)]
struct DownloadParams {
  token: String,
}

async fn download(State(daemon): State<Arc<Daemon>>, Query(params): Query<DownloadParams>) -> Response {
  touch(&daemon);
  let result: Result<(std::path::PathBuf, Vec<u8>), DaemonError> = async {
    let target = daemon.signer.validate(&params.token)?;
    let folder_root = std::path::PathBuf::from(&target.folder);
    let fm = daemon.folders.read().await.values().find(|f| f.path() == &folder_root).cloned();
    fm.ok_or_else(|| DaemonError::FolderNotFound(target.folder.clone()))?;
    let resolved = daemon.signer.resolve(&target, &folder_root)?;
    let bytes = tokio::fs::read(&resolved).await.map_err(|_| DaemonError::DocumentNotFound(target.file.clone()))?;
    Ok((resolved, bytes))
  }
  .await;

  match result {
    Ok((path, bytes)) => {
      let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
      ([(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\""))], bytes).into_response()
    }
    Err(e) => e.into_response_with_path("/api/v1/download"),
  }
}

async fn respond<T: Serialize>(path: &str, fut: impl std::future::Future<Output = Result<T, DaemonError>>) -> Response {
  match fut.await {
    Ok(value) => Json(value).into_response(),
    Err(e) => e.into_response_with_path(path),
  }
}
