//! Query service (C11, §4.6, §4.8).
//!
//! Read-only surface over every open folder's store. Shares the same
//! [`db::FolderDb`] handle the lifecycle manager writes through (§5: "the
//! per-folder document store is opened once per daemon and shared between C6
//! and C11"); this module never mutates a store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::ScoredChunk;
use fmcp_core::folder::{FolderId, FolderRuntimeState};
use fmcp_core::{Chunk, Document, KeyPhrase, OffsetCursor, reconstruct_text, select_diverse};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::download::DownloadUrlSigner;
use crate::error::DaemonError;
use crate::folder_manager::FolderManager;
use crate::model_scheduler::ModelScheduler;

/// `get-document-text` hard cap (§4.8 item 6).
const MAX_TEXT_CHARS: usize = 50_000;
/// Preview length embedded in `get-document-metadata` chunk summaries.
const CHUNK_PREVIEW_CHARS: usize = 100;
/// Diverse key phrases shown per folder in `list-folders` (§4.8 item 1).
const FOLDER_PREVIEW_PHRASES: usize = 15;
/// Diverse key phrases shown per document/subdirectory elsewhere.
const DOCUMENT_PREVIEW_PHRASES: usize = 5;
/// Recently-modified files surfaced per folder preview.
const RECENT_FILES_LIMIT: usize = 5;

pub type FolderRegistry = RwLock<HashMap<FolderId, Arc<FolderManager>>>;

#[derive(Debug, Clone, Serialize)]
pub struct FolderSummary {
  #[serde(flatten)]
  pub runtime: FolderRuntimeState,
  pub top_key_phrases: Vec<KeyPhrase>,
  pub complexity: &'static str,
  pub recently_modified: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
  pub path: String,
  pub size: u64,
  pub last_modified: DateTime<Utc>,
  pub top_key_phrases: Vec<KeyPhrase>,
  pub readability: f64,
  pub download_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubdirectorySummary {
  pub name: String,
  pub document_count: usize,
  pub top_key_phrases: Vec<KeyPhrase>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExploreResult {
  pub subdirectories: Vec<SubdirectorySummary>,
  pub files: Vec<DocumentSummary>,
  pub total_documents: usize,
  pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
  pub chunk_id: String,
  pub chunk_index: usize,
  pub top_key_phrases: Vec<KeyPhrase>,
  pub has_code: bool,
  pub readability: f64,
  pub start_byte: usize,
  pub end_byte: usize,
  pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentText {
  pub text: String,
  pub offset: usize,
  pub next_offset: Option<usize>,
  pub extraction_warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunkResult {
  pub document_path: String,
  pub chunk_index: usize,
  pub content: String,
  pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocumentResult {
  pub path: String,
  pub score: f64,
  pub top_key_phrases: Vec<KeyPhrase>,
  pub readability: f64,
  pub chunk_count: usize,
  pub size: u64,
  pub last_modified: DateTime<Utc>,
  pub download_url: String,
}

pub struct QueryService {
  folders: Arc<FolderRegistry>,
  scheduler: Arc<ModelScheduler>,
  signer: Arc<DownloadUrlSigner>,
}

impl QueryService {
  pub fn new(folders: Arc<FolderRegistry>, scheduler: Arc<ModelScheduler>, signer: Arc<DownloadUrlSigner>) -> Self {
    Self { folders, scheduler, signer }
  }

  async fn folder(&self, folder_path: &str) -> Result<Arc<FolderManager>, DaemonError> {
    let target = PathBuf::from(folder_path);
    self
      .folders
      .read()
      .await
      .values()
      .find(|f| f.path() == &target)
      .cloned()
      .ok_or_else(|| DaemonError::FolderNotFound(folder_path.to_string()))
  }

  pub async fn list_folders(&self) -> Vec<FolderSummary> {
    let folders: Vec<Arc<FolderManager>> = self.folders.read().await.values().cloned().collect();
    let mut out = Vec::with_capacity(folders.len());
    for fm in folders {
      let runtime = fm.snapshot();
      let docs = fm.db().list_documents().await.unwrap_or_default();

      let mut total_readability = 0.0;
      let mut chunk_count = 0usize;
      for doc in &docs {
        let chunks = fm.db().list_chunks(&doc.id).await.unwrap_or_default();
        total_readability += chunks.iter().map(|c| c.readability).sum::<f64>();
        chunk_count += chunks.len();
      }
      let avg_readability = if chunk_count == 0 { 70.0 } else { total_readability / chunk_count as f64 };

      out.push(build_folder_summary(runtime, &docs, avg_readability));
    }
    out
  }

  pub async fn explore(&self, folder_path: &str, sub_path: Option<&str>, cursor: Option<&str>, limit: usize) -> Result<ExploreResult, DaemonError> {
    let fm = self.folder(folder_path).await?;
    let docs = fm.db().list_documents().await?;

    let scope = sub_path.unwrap_or("").trim_matches('/');
    let prefix = if scope.is_empty() { String::new() } else { format!("{scope}/") };

    let mut direct_files: Vec<&Document> = Vec::new();
    let mut subdirs: HashMap<String, usize> = HashMap::new();
    let mut subdir_phrases: HashMap<String, Vec<KeyPhrase>> = HashMap::new();

    for doc in &docs {
      let Some(rest) = doc.path.strip_prefix(prefix.as_str()) else { continue };
      match rest.split_once('/') {
        Some((dir, _)) => {
          *subdirs.entry(dir.to_string()).or_insert(0) += 1;
          subdir_phrases.entry(dir.to_string()).or_default().extend(doc.keywords.clone());
        }
        None => direct_files.push(doc),
      }
    }

    let offset = decode_offset(cursor, &format!("explore:{folder_path}:{scope}"))?;
    let total = direct_files.len();
    direct_files.sort_by(|a, b| a.path.cmp(&b.path));

    let page: Vec<&Document> = direct_files.into_iter().skip(offset).take(limit).collect();
    let next_cursor = if offset + page.len() < total {
      Some(encode_offset(offset + page.len(), &format!("explore:{folder_path}:{scope}")))
    } else {
      None
    };

    let mut files = Vec::with_capacity(page.len());
    for doc in page {
      files.push(self.document_summary(&fm, folder_path, doc).await);
    }

    let mut subdirectories: Vec<SubdirectorySummary> = subdirs
      .into_iter()
      .map(|(name, document_count)| {
        let phrases = subdir_phrases.remove(&name).unwrap_or_default();
        SubdirectorySummary { name, document_count, top_key_phrases: select_diverse(&phrases, DOCUMENT_PREVIEW_PHRASES) }
      })
      .collect();
    subdirectories.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(ExploreResult { subdirectories, files, total_documents: total, next_cursor })
  }

  pub async fn list_documents(&self, folder_path: &str, sub_path: Option<&str>, recursive: bool, cursor: Option<&str>, limit: usize) -> Result<Page<DocumentSummary>, DaemonError> {
    let fm = self.folder(folder_path).await?;
    let mut docs = fm.db().list_documents().await?;

    if let Some(scope) = sub_path.map(|s| s.trim_matches('/')).filter(|s| !s.is_empty()) {
      let prefix = format!("{scope}/");
      docs.retain(|d| {
        let Some(rest) = d.path.strip_prefix(prefix.as_str()) else { return false };
        recursive || !rest.contains('/')
      });
    }

    docs.sort_by(|a, b| a.path.cmp(&b.path));
    let total = docs.len();
    let offset = decode_offset(cursor, &format!("docs:{folder_path}:{sub_path:?}:{recursive}"))?;
    let page: Vec<Document> = docs.into_iter().skip(offset).take(limit).collect();
    let next_cursor = if offset + page.len() < total {
      Some(encode_offset(offset + page.len(), &format!("docs:{folder_path}:{sub_path:?}:{recursive}")))
    } else {
      None
    };

    let mut items = Vec::with_capacity(page.len());
    for doc in &page {
      items.push(self.document_summary(&fm, folder_path, doc).await);
    }
    Ok(Page { items, next_cursor })
  }

  pub async fn document_metadata(&self, folder_path: &str, file: &str, cursor: Option<&str>, limit: usize) -> Result<Page<ChunkSummary>, DaemonError> {
    let fm = self.folder(folder_path).await?;
    let doc = fm.db().get_document_by_path(file).await?.ok_or_else(|| DaemonError::DocumentNotFound(file.to_string()))?;
    let chunks = fm.db().list_chunks(&doc.id).await?;

    let total = chunks.len();
    let offset = decode_offset(cursor, &format!("meta:{folder_path}:{file}"))?;
    let page: Vec<Chunk> = chunks.into_iter().skip(offset).take(limit).collect();
    let next_cursor = if offset + page.len() < total {
      Some(encode_offset(offset + page.len(), &format!("meta:{folder_path}:{file}")))
    } else {
      None
    };

    let items = page.into_iter().map(chunk_summary).collect();
    Ok(Page { items, next_cursor })
  }

  pub async fn get_chunks(&self, folder_path: &str, file: &str, chunk_ids: &[String]) -> Result<Vec<Chunk>, DaemonError> {
    let fm = self.folder(folder_path).await?;
    let doc = fm.db().get_document_by_path(file).await?.ok_or_else(|| DaemonError::DocumentNotFound(file.to_string()))?;
    let all = fm.db().list_chunks(&doc.id).await?;

    let wanted: std::collections::HashSet<&str> = chunk_ids.iter().map(String::as_str).collect();
    Ok(all.into_iter().filter(|c| wanted.contains(c.id.to_string().as_str())).collect())
  }

  pub async fn document_text(&self, folder_path: &str, file: &str, max_chars: usize, offset: usize) -> Result<DocumentText, DaemonError> {
    let fm = self.folder(folder_path).await?;
    let doc = fm.db().get_document_by_path(file).await?.ok_or_else(|| DaemonError::DocumentNotFound(file.to_string()))?;
    let chunks = fm.db().list_chunks(&doc.id).await?;
    let full = reconstruct_text(&chunks);

    let max_chars = max_chars.min(MAX_TEXT_CHARS);
    let chars: Vec<char> = full.chars().collect();
    let start = offset.min(chars.len());
    let end = (start + max_chars).min(chars.len());
    let text: String = chars[start..end].iter().collect();
    let next_offset = if end < chars.len() { Some(end) } else { None };

    let extraction_warnings = extraction_warnings_for(&doc.mime_type);
    Ok(DocumentText { text, offset: start, next_offset, extraction_warnings })
  }

  pub async fn search_content(&self, folder_path: &str, semantic_concepts: Option<&[String]>, exact_terms: Option<&[String]>, min_score: Option<f64>, limit: usize) -> Result<Vec<ScoredChunkResult>, DaemonError> {
    if semantic_concepts.is_none() && exact_terms.is_none() {
      return Err(DaemonError::BadRequest("search_content requires semantic_concepts or exact_terms".into()));
    }

    let fm = self.folder(folder_path).await?;
    let limit = limit.min(50);
    let query_text = exact_terms.map(|t| t.join(" ")).unwrap_or_default();

    let hits: Vec<ScoredChunk> = if let Some(concepts) = semantic_concepts {
      let joined = concepts.join(" ");
      let vectors = self.scheduler.search(fm.model_id(), vec![joined.clone()]).await?;
      let vector = vectors.into_iter().next().unwrap_or_default();
      let query_text = if query_text.is_empty() { joined } else { query_text };
      fm.db().search_content(&vector, &query_text, limit).await?
    } else {
      exact_only_search(fm.db(), &query_text, limit).await?
    };

    let mut results: Vec<ScoredChunkResult> = Vec::new();
    for hit in hits {
      if min_score.is_some_and(|min| hit.score < min) {
        continue;
      }
      let doc_path = fm.db().get_document(&hit.document_id).await?.map(|d| d.path).unwrap_or_default();
      results.push(ScoredChunkResult { document_path: doc_path, chunk_index: hit.chunk.chunk_index, content: hit.chunk.content, score: hit.score });
    }
    Ok(results)
  }

  pub async fn find_documents(&self, folder_path: &str, query: &str, limit: usize) -> Result<Vec<ScoredDocumentResult>, DaemonError> {
    let fm = self.folder(folder_path).await?;
    let limit = limit.min(50);

    let vectors = self.scheduler.search(fm.model_id(), vec![query.to_string()]).await?;
    let vector = vectors.into_iter().next().unwrap_or_default();
    let hits = fm.db().search_documents(&vector, limit).await?;

    let mut results = Vec::with_capacity(hits.len());
    for (doc, distance) in hits {
      let chunks = fm.db().list_chunks(&doc.id).await.unwrap_or_default();
      let score = (1.0 - distance as f64).max(0.0);
      results.push(ScoredDocumentResult {
        path: doc.path.clone(),
        score,
        top_key_phrases: select_diverse(&doc.keywords, DOCUMENT_PREVIEW_PHRASES),
        readability: average_readability(&chunks),
        chunk_count: chunks.len(),
        size: doc.size,
        last_modified: doc.last_modified,
        download_url: self.signer.sign(folder_path, &doc.path),
      });
    }
    Ok(results)
  }

  async fn document_summary(&self, fm: &FolderManager, folder_path: &str, doc: &Document) -> DocumentSummary {
    let chunks = fm.db().list_chunks(&doc.id).await.unwrap_or_default();
    DocumentSummary {
      path: doc.path.clone(),
      size: doc.size,
      last_modified: doc.last_modified,
      top_key_phrases: select_diverse(&doc.keywords, DOCUMENT_PREVIEW_PHRASES),
      readability: average_readability(&chunks),
      download_url: self.signer.sign(folder_path, &doc.path),
    }
  }
}

/// Mean chunk readability; an empty document (no chunks yet) reads as fully
/// simple rather than falsely "technical".
fn average_readability(chunks: &[Chunk]) -> f64 {
  if chunks.is_empty() {
    return 70.0;
  }
  chunks.iter().map(|c| c.readability).sum::<f64>() / chunks.len() as f64
}

/// Complexity bucket from average readability (§4.8.1: thresholds 70/50).
fn complexity_label(avg_readability: f64) -> &'static str {
  if avg_readability >= 70.0 {
    "simple"
  } else if avg_readability >= 50.0 {
    "moderate"
  } else {
    "technical"
  }
}

fn build_folder_summary(runtime: FolderRuntimeState, docs: &[Document], avg_readability: f64) -> FolderSummary {
  let phrases: Vec<KeyPhrase> = docs.iter().flat_map(|d| d.keywords.clone()).collect();
  let top_key_phrases = select_diverse(&phrases, FOLDER_PREVIEW_PHRASES);

  let mut recent: Vec<&Document> = docs.iter().collect();
  recent.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
  let recently_modified = recent.into_iter().take(RECENT_FILES_LIMIT).map(|d| d.path.clone()).collect();

  FolderSummary { complexity: complexity_label(avg_readability), top_key_phrases, recently_modified, runtime }
}

fn chunk_summary(chunk: Chunk) -> ChunkSummary {
  let preview: String = chunk.content.chars().take(CHUNK_PREVIEW_CHARS).collect();
  ChunkSummary {
    chunk_id: chunk.id.to_string(),
    chunk_index: chunk.chunk_index,
    top_key_phrases: select_diverse(&chunk.key_phrases, DOCUMENT_PREVIEW_PHRASES),
    has_code: chunk.has_code,
    readability: chunk.readability,
    start_byte: chunk.start_byte,
    end_byte: chunk.end_byte,
    preview,
  }
}

/// Exact-term-only search (§4.8 item 7: "exact-terms present without
/// semantic-concepts -> substring match at chunk level"). Starts every match
/// from a semantic score of `1.0` so the boost rule applies uniformly.
async fn exact_only_search(db: &db::FolderDb, query_text: &str, limit: usize) -> Result<Vec<ScoredChunk>, DaemonError> {
  let terms: Vec<String> = query_text.split_whitespace().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect();
  let docs = db.list_documents().await?;

  let mut scored = Vec::new();
  for doc in &docs {
    let chunks = db.list_chunks(&doc.id).await?;
    for chunk in chunks {
      let lower = chunk.content.to_lowercase();
      let matches = terms.iter().filter(|t| lower.contains(t.as_str())).count();
      if matches == 0 {
        continue;
      }
      let score = 1.5f64.powi(matches as i32);
      let document_id = chunk.document_id;
      scored.push(ScoredChunk { chunk, document_id, score });
    }
  }

  scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
  scored.truncate(limit);
  Ok(scored)
}

fn extraction_warnings_for(mime_type: &str) -> Vec<String> {
  match mime_type {
    "application/pdf" => vec!["tables and images are not preserved in extracted text".to_string()],
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" | "text/csv" => {
      vec!["formulas are flattened to their last computed value".to_string()]
    }
    _ => Vec::new(),
  }
}

fn decode_offset(cursor: Option<&str>, scope: &str) -> Result<usize, DaemonError> {
  match cursor {
    None => Ok(0),
    Some(token) => {
      let decoded: OffsetCursor = fmcp_core::decode(token).map_err(|e| DaemonError::BadRequest(format!("invalid continuation token: {e}")))?;
      if decoded.scope != scope {
        return Err(DaemonError::BadRequest("continuation token does not match this query".into()));
      }
      Ok(decoded.offset)
    }
  }
}

fn encode_offset(offset: usize, scope: &str) -> String {
  fmcp_core::encode(&OffsetCursor { offset, scope: scope.to_string() })
}
