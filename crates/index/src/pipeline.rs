//! Indexing pipeline (C6, §4.4): scan -> diff -> chunk -> embed -> persist.
//!
//! One `IndexingPipeline` drives one folder's store. `run_full_scan` is the
//! initial pass (§4.5 pauses the watcher around it); `reindex_path` and
//! `remove_path` are the incremental entry points a debounced watcher event
//! feeds into, one file at a time.

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use db::FolderDb;
use extract::ExtractorRegistry;
use fmcp_core::{Chunk, ChunkEmbedding, ChunkingConfig, Document, DocumentEmbedding};
use thiserror::Error;
use tracing::{debug, warn};

use crate::embedder::BatchEmbedder;
use crate::scanner::{ScanResult, Scanner};

/// Target batch size for embed submissions (§4.4 step 4: "32 texts or ~8k
/// tokens, whichever comes first"). Token counting is deferred to the
/// embedder; the pipeline caps on text count alone.
const EMBED_BATCH_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("scan error: {0}")]
  Scan(#[from] crate::scanner::ScanError),
  #[error("db error: {0}")]
  Db(#[from] db::DbError),
  #[error("embedding error: {0}")]
  Embedding(#[from] embedding::EmbeddingError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Outcome of one scan-to-persist cycle (§8 seed-scenario friendly summary).
#[derive(Debug, Default, Clone)]
pub struct PipelineOutcome {
  pub indexed: usize,
  pub unchanged: usize,
  pub removed: usize,
  pub failed: usize,
}

/// Drives extraction -> chunking -> embedding -> persistence for one folder.
pub struct IndexingPipeline {
  db: Arc<FolderDb>,
  embedder: Arc<dyn BatchEmbedder>,
  extractors: ExtractorRegistry,
  scanner: Scanner,
  model_id: String,
  chunking: ChunkingConfig,
}

impl IndexingPipeline {
  pub fn new(db: Arc<FolderDb>, embedder: Arc<dyn BatchEmbedder>, model_id: String, chunking: ChunkingConfig) -> Self {
    Self { db, embedder, extractors: ExtractorRegistry::with_defaults(), scanner: Scanner::new(), model_id, chunking }
  }

  /// Full scan-diff-index pass over `root` (§4.4 steps 1-5). Documents whose
  /// path is no longer present on disk are removed; documents whose content
  /// hash is unchanged are left untouched; everything else is
  /// extracted/chunked/embedded/persisted from scratch.
  pub async fn run_full_scan(&self, root: &Path) -> Result<PipelineOutcome, PipelineError> {
    self.run_full_scan_with_progress(root, |_, _| {}).await
  }

  /// As [`Self::run_full_scan`], but invokes `on_progress(finished, total)`
  /// after every processed file so a caller (C8's lifecycle manager) can
  /// derive the `indexing` progress fraction (§4.1).
  pub async fn run_full_scan_with_progress(
    &self,
    root: &Path,
    mut on_progress: impl FnMut(usize, usize),
  ) -> Result<PipelineOutcome, PipelineError> {
    let ScanResult { files, .. } = self.scanner.scan(root, |_| {});
    let existing = self.db.list_documents().await?;

    let mut outcome = PipelineOutcome::default();
    let seen: std::collections::HashSet<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();

    for doc in &existing {
      if !seen.contains(doc.path.as_str()) {
        self.db.delete_chunks_for_document(&doc.id).await?;
        self.db.delete_document(&doc.id).await?;
        outcome.removed += 1;
      }
    }

    let total = files.len();
    for (i, file) in files.iter().enumerate() {
      let prior = existing.iter().find(|d| d.path == file.relative_path);
      if let Some(prior) = prior
        && prior.content_hash == file.checksum
      {
        outcome.unchanged += 1;
        on_progress(i + 1, total);
        continue;
      }

      match self.index_one(root, &file.relative_path, file.checksum.clone(), file.mime_type, file.size, file.mtime).await {
        Ok(()) => outcome.indexed += 1,
        Err(e) => {
          warn!("failed to index {}: {}", file.relative_path, e);
          outcome.failed += 1;
        }
      }
      on_progress(i + 1, total);
    }

    Ok(outcome)
  }

  /// Incremental re-index of a single changed/created file (§4.5 watcher hookup).
  pub async fn reindex_path(&self, root: &Path, relative_path: &str) -> Result<(), PipelineError> {
    let absolute = root.join(relative_path);
    let metadata = tokio::fs::metadata(&absolute).await?;
    let mime_type = self.extractors.mime_type_for(relative_path).unwrap_or("text/plain");
    let bytes = tokio::fs::read(&absolute).await?;
    let checksum = content_hash(&bytes);

    if let Some(prior) = self.db.get_document_by_path(relative_path).await?
      && prior.content_hash == checksum
    {
      debug!("{} unchanged, skipping re-index", relative_path);
      return Ok(());
    }

    let mtime = metadata
      .modified()
      .ok()
      .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
      .map(|d| d.as_secs())
      .unwrap_or_default();

    self.index_one(root, relative_path, checksum, mime_type, metadata.len(), mtime).await
  }

  /// Remove a deleted file's document and chunks (§4.5 watcher hookup, §9:
  /// "removing a folder/file cancels any of its work still queued").
  pub async fn remove_path(&self, relative_path: &str) -> Result<(), PipelineError> {
    if let Some(doc) = self.db.get_document_by_path(relative_path).await? {
      self.db.delete_chunks_for_document(&doc.id).await?;
      self.db.delete_document(&doc.id).await?;
    }
    Ok(())
  }

  async fn index_one(
    &self,
    root: &Path,
    relative_path: &str,
    content_hash: String,
    mime_type: &'static str,
    size: u64,
    mtime_secs: u64,
  ) -> Result<(), PipelineError> {
    let absolute = root.join(relative_path);
    let bytes = tokio::fs::read(&absolute).await?;

    let extracted = self
      .extractors
      .extract(relative_path, &bytes)
      .map_err(|e| PipelineError::Io(std::io::Error::other(e.to_string())))?;

    if let Some(prior) = self.db.get_document_by_path(relative_path).await? {
      self.db.delete_chunks_for_document(&prior.id).await?;
    }

    let last_modified = Utc.timestamp_opt(mtime_secs as i64, 0).single().unwrap_or_else(Utc::now);
    let document = Document::new(relative_path.to_string(), size, mime_type.to_string(), last_modified, content_hash, extracted.metadata);

    let chunks = crate::doc_chunker::chunk_text(document.id, &extracted.text, &self.chunking);

    let mut pairs = Vec::with_capacity(chunks.len());
    let mut weighted_sum: Vec<f64> = Vec::new();
    let mut total_weight: f64 = 0.0;

    if !chunks.is_empty() {
      let mut vectors = Vec::with_capacity(chunks.len());
      for batch in chunks.chunks(EMBED_BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let batch_vectors = self.embedder.embed_index_batch(&self.model_id, &self.db.folder_id, texts).await?;
        vectors.extend(batch_vectors);
      }

      for (chunk, vector) in chunks.into_iter().zip(vectors.into_iter()) {
        let weight = chunk.content.len().max(1) as f64;
        if weighted_sum.is_empty() {
          weighted_sum = vec![0.0; vector.len()];
        }
        for (acc, v) in weighted_sum.iter_mut().zip(vector.iter()) {
          *acc += (*v as f64) * weight;
        }
        total_weight += weight;

        let embedding = ChunkEmbedding { chunk_id: chunk.id, vector, model_id: self.model_id.clone() };
        pairs.push((chunk, embedding));
      }
    }

    let document_embedding = if total_weight > 0.0 {
      let vector: Vec<f32> = weighted_sum.iter().map(|v| (v / total_weight) as f32).collect();
      Some(DocumentEmbedding { document_id: document.id, vector, model_id: self.model_id.clone() })
    } else {
      None
    };

    self.db.upsert_document(&document, document_embedding.as_ref()).await?;
    self.db.add_chunks(&pairs).await?;

    Ok(())
  }
}

fn content_hash(bytes: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use embedding::{EmbeddingError, EmbeddingMode, EmbeddingProvider, ModelRegistry};
  use fmcp_core::FolderId;
  use tempfile::TempDir;

  struct StubProvider;

  #[async_trait]
  impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
      "stub"
    }
    fn model_id(&self) -> &str {
      "stub-model"
    }
    fn dimensions(&self) -> usize {
      4
    }
    async fn embed(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
      Ok(vec![text.len() as f32, 0.0, 0.0, 0.0])
    }
    async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      let mut out = Vec::with_capacity(texts.len());
      for t in texts {
        out.push(self.embed(t, EmbeddingMode::Document).await?);
      }
      Ok(out)
    }
    async fn is_available(&self) -> bool {
      true
    }
  }

  async fn make_pipeline(data_dir: &Path) -> (TempDir, IndexingPipeline) {
    let folder_id = FolderId::from_path(data_dir);
    let db = Arc::new(FolderDb::open_at_path(folder_id, data_dir.join("store.lancedb"), 4).await.unwrap());
    let registry = Arc::new(ModelRegistry::new(Arc::new(|_id: &str| {
      Ok((Arc::new(StubProvider) as Arc<dyn EmbeddingProvider + Send + Sync>, fmcp_core::ModelKind::OnDeviceAccelerated))
    })));
    let root = TempDir::new().unwrap();
    let pipeline = IndexingPipeline::new(db, registry, "stub-model".to_string(), ChunkingConfig::default());
    (root, pipeline)
  }

  #[tokio::test]
  async fn test_full_scan_indexes_new_files() {
    let data_dir = TempDir::new().unwrap();
    let (root, pipeline) = make_pipeline(data_dir.path()).await;
    std::fs::write(root.path().join("a.md"), "# hello world").unwrap();

    let outcome = pipeline.run_full_scan(root.path()).await.unwrap();
    assert_eq!(outcome.indexed, 1);
    assert_eq!(outcome.unchanged, 0);
  }

  #[tokio::test]
  async fn test_full_scan_second_pass_is_unchanged() {
    let data_dir = TempDir::new().unwrap();
    let (root, pipeline) = make_pipeline(data_dir.path()).await;
    std::fs::write(root.path().join("a.md"), "# hello world").unwrap();

    pipeline.run_full_scan(root.path()).await.unwrap();
    let outcome = pipeline.run_full_scan(root.path()).await.unwrap();
    assert_eq!(outcome.indexed, 0);
    assert_eq!(outcome.unchanged, 1);
  }

  #[tokio::test]
  async fn test_full_scan_removes_deleted_files() {
    let data_dir = TempDir::new().unwrap();
    let (root, pipeline) = make_pipeline(data_dir.path()).await;
    let path = root.path().join("a.md");
    std::fs::write(&path, "# hello world").unwrap();
    pipeline.run_full_scan(root.path()).await.unwrap();

    std::fs::remove_file(&path).unwrap();
    let outcome = pipeline.run_full_scan(root.path()).await.unwrap();
    assert_eq!(outcome.removed, 1);
  }

  #[tokio::test]
  async fn test_remove_path_deletes_document_and_chunks() {
    let data_dir = TempDir::new().unwrap();
    let (root, pipeline) = make_pipeline(data_dir.path()).await;
    std::fs::write(root.path().join("a.md"), "# hello world").unwrap();
    pipeline.run_full_scan(root.path()).await.unwrap();

    pipeline.remove_path("a.md").await.unwrap();
    assert_eq!(pipeline.db.count_documents().await.unwrap(), 0);
  }
}
