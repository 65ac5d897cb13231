//! Daemon-wide error taxonomy (§7).
//!
//! Individual modules define their own closed error enums (scheduler,
//! pipeline, db, embedding, token); [`DaemonError`] is the taxonomy the
//! transport layer (§6) maps onto HTTP status codes, so a handler never has
//! to pattern-match a lower-level error string to pick a status.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
  #[error("configuration error: {0}")]
  Configuration(String),
  #[error("model unavailable: {0}")]
  ModelUnavailable(String),
  #[error("store error: {0}")]
  Store(#[from] db::DbError),
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error("folder not found: {0}")]
  FolderNotFound(String),
  #[error("document not found: {0}")]
  DocumentNotFound(String),
  #[error("download token invalid: {0}")]
  InvalidToken(#[from] fmcp_core::token::TokenError),
  #[error("path escapes folder root")]
  PathEscape,
  #[error("scheduler error: {0}")]
  Scheduler(#[from] crate::model_scheduler::SchedulerError),
  #[error("internal error: {0}")]
  Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
  message: String,
  timestamp: chrono::DateTime<Utc>,
  path: String,
}

impl DaemonError {
  fn status(&self) -> StatusCode {
    match self {
      DaemonError::Configuration(_) | DaemonError::BadRequest(_) => StatusCode::BAD_REQUEST,
      DaemonError::FolderNotFound(_) | DaemonError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
      DaemonError::ModelUnavailable(_) | DaemonError::Scheduler(_) => StatusCode::SERVICE_UNAVAILABLE,
      DaemonError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
      DaemonError::PathEscape => StatusCode::FORBIDDEN,
      DaemonError::Store(_) | DaemonError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn kind(&self) -> &'static str {
    match self {
      DaemonError::Configuration(_) => "configuration_error",
      DaemonError::ModelUnavailable(_) => "model_unavailable",
      DaemonError::Store(_) => "store_error",
      DaemonError::BadRequest(_) => "bad_request",
      DaemonError::FolderNotFound(_) => "folder_not_found",
      DaemonError::DocumentNotFound(_) => "document_not_found",
      DaemonError::InvalidToken(_) => "invalid_token",
      DaemonError::PathEscape => "path_escape",
      DaemonError::Scheduler(_) => "scheduler_error",
      DaemonError::Internal(_) => "internal_error",
    }
  }

  /// Attach the request path for the structured response body (§6).
  pub fn into_response_with_path(self, path: &str) -> Response {
    let status = self.status();
    let body = ErrorBody { error: self.kind().to_string(), message: self.to_string(), timestamp: Utc::now(), path: path.to_string() };
    (status, Json(body)).into_response()
  }
}

impl IntoResponse for DaemonError {
  fn into_response(self) -> Response {
    self.into_response_with_path("")
  }
}
