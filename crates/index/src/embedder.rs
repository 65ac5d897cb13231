//! Batch embedding dispatch seam between the indexing pipeline and the model
//! scheduler (C6 -> C5, §4.3, §4.4 step 4).
//!
//! The pipeline only needs "embed these document texts for this model,
//! tagged with this folder". It does not need to know whether the callee
//! is a bare model registry (tests, a single-folder embedder) or a full
//! per-model scheduler enforcing mutual exclusion, pre-emption, and
//! backpressure — the daemon wires the latter in at startup.

use async_trait::async_trait;
use embedding::EmbeddingError;
use fmcp_core::FolderId;

#[async_trait]
pub trait BatchEmbedder: Send + Sync {
  async fn embed_index_batch(&self, model_id: &str, folder_id: &FolderId, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Direct registry-backed embedder: loads the model and calls it without
/// going through a scheduler. Used by tests and standalone tools; the
/// daemon uses its model scheduler instead so concurrent folders don't
/// trample each other's embed calls (§4.3 rule 1).
#[async_trait]
impl BatchEmbedder for embedding::ModelRegistry {
  async fn embed_index_batch(&self, model_id: &str, _folder_id: &FolderId, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let provider = self.ensure_loaded(model_id).await?;
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    provider.embed_batch(&refs, embedding::EmbeddingMode::Document).await
  }
}
