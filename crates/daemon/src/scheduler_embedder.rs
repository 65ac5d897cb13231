//! Adapts [`ModelScheduler`] to the indexing pipeline's [`BatchEmbedder`] seam.

use std::sync::Arc;

use async_trait::async_trait;
use embedding::EmbeddingError;
use fmcp_core::FolderId;
use index::BatchEmbedder;

use crate::model_scheduler::ModelScheduler;

pub struct SchedulerEmbedder {
  pub scheduler: Arc<ModelScheduler>,
}

#[async_trait]
impl BatchEmbedder for SchedulerEmbedder {
  async fn embed_index_batch(&self, model_id: &str, folder_id: &FolderId, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self
      .scheduler
      .submit_index_batch(model_id, folder_id.clone(), texts)
      .await
      .map_err(|e| EmbeddingError::ProviderError(e.to_string()))
  }
}
