//! Model scheduler / task queue (C5, §4.3, §5).
//!
//! One worker task per loaded model is the sole caller of that model's
//! `embed`. `search` tasks pre-empt queued `index` batches but never
//! interrupt one already in flight; index submission is backpressured once a
//! model's queue depth passes [`fmcp_core::SchedulerConfig::backpressure_watermark`];
//! folder removal cancels that folder's still-queued `index` tasks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use embedding::{EmbeddingMode, ModelRegistry};
use fmcp_core::FolderId;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SchedulerError {
  #[error("embedding error: {0}")]
  Embedding(#[from] embedding::EmbeddingError),
  #[error("queue is full for model {0}, retry later")]
  Backpressure(String),
  #[error("task cancelled: folder {0} was removed")]
  Cancelled(String),
  #[error("model worker for {0} is shutting down")]
  WorkerGone(String),
}

type EmbedReply = oneshot::Sender<Result<Vec<Vec<f32>>, SchedulerError>>;

enum Task {
  Search { texts: Vec<String>, reply: EmbedReply },
  Index { folder_id: FolderId, texts: Vec<String>, reply: EmbedReply },
}

struct Worker {
  search_tx: mpsc::UnboundedSender<Task>,
  index_tx: mpsc::Sender<Task>,
  queued_index: Arc<AtomicUsize>,
  cancelled_folders: Arc<Mutex<HashSet<FolderId>>>,
  shutdown: CancellationToken,
}

/// Per-model worker pool (C5). One [`Worker`] is spawned lazily the first
/// time a model id is submitted to.
pub struct ModelScheduler {
  registry: Arc<ModelRegistry>,
  workers: Mutex<HashMap<String, Arc<Worker>>>,
  backpressure_watermark: usize,
  idle_eviction: Duration,
}

impl ModelScheduler {
  pub fn new(registry: Arc<ModelRegistry>, backpressure_watermark: usize, idle_eviction_secs: u64) -> Self {
    Self {
      registry,
      workers: Mutex::new(HashMap::new()),
      backpressure_watermark,
      idle_eviction: Duration::from_secs(idle_eviction_secs),
    }
  }

  async fn worker_for(&self, model_id: &str) -> Arc<Worker> {
    let mut workers = self.workers.lock().await;
    if let Some(w) = workers.get(model_id) {
      return w.clone();
    }

    let (search_tx, search_rx) = mpsc::unbounded_channel();
    let (index_tx, index_rx) = mpsc::channel(self.backpressure_watermark.max(1));
    let worker = Arc::new(Worker {
      search_tx,
      index_tx,
      queued_index: Arc::new(AtomicUsize::new(0)),
      cancelled_folders: Arc::new(Mutex::new(HashSet::new())),
      shutdown: CancellationToken::new(),
    });

    spawn_worker_loop(
      model_id.to_string(),
      self.registry.clone(),
      search_rx,
      index_rx,
      worker.queued_index.clone(),
      worker.cancelled_folders.clone(),
      worker.shutdown.clone(),
      self.idle_eviction,
    );

    workers.insert(model_id.to_string(), worker.clone());
    worker
  }

  /// Submit a `search` task: pre-empts queued `index` batches for this model.
  pub async fn search(&self, model_id: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>, SchedulerError> {
    let worker = self.worker_for(model_id).await;
    let (reply_tx, reply_rx) = oneshot::channel();
    worker
      .search_tx
      .send(Task::Search { texts, reply: reply_tx })
      .map_err(|_| SchedulerError::WorkerGone(model_id.to_string()))?;
    reply_rx.await.map_err(|_| SchedulerError::WorkerGone(model_id.to_string()))?
  }

  /// Submit an `index` batch tagged with its folder. Returns
  /// [`SchedulerError::Backpressure`] without enqueuing if the model's queue
  /// is already at its watermark (§4.3 rule 4); the caller (C6) should retry
  /// once quota frees up.
  pub async fn submit_index_batch(
    &self,
    model_id: &str,
    folder_id: FolderId,
    texts: Vec<String>,
  ) -> Result<Vec<Vec<f32>>, SchedulerError> {
    let worker = self.worker_for(model_id).await;

    if worker.queued_index.load(Ordering::SeqCst) >= self.backpressure_watermark {
      return Err(SchedulerError::Backpressure(model_id.to_string()));
    }

    worker.queued_index.fetch_add(1, Ordering::SeqCst);
    let (reply_tx, reply_rx) = oneshot::channel();
    if worker.index_tx.send(Task::Index { folder_id, texts, reply: reply_tx }).await.is_err() {
      worker.queued_index.fetch_sub(1, Ordering::SeqCst);
      return Err(SchedulerError::WorkerGone(model_id.to_string()));
    }

    reply_rx.await.map_err(|_| SchedulerError::WorkerGone(model_id.to_string()))?
  }

  /// Whether a model currently has queue room for another `index` batch.
  pub async fn has_index_quota(&self, model_id: &str) -> bool {
    let worker = self.worker_for(model_id).await;
    worker.queued_index.load(Ordering::SeqCst) < self.backpressure_watermark
  }

  /// Cancel every queued (not yet in-flight) `index` task tagged with
  /// `folder_id` (§4.3 rule 5, §8 seed scenario 6). In-flight batches run to
  /// completion.
  pub async fn cancel_folder(&self, folder_id: &FolderId) {
    let workers: Vec<Arc<Worker>> = self.workers.lock().await.values().cloned().collect();
    for worker in workers {
      worker.cancelled_folders.lock().await.insert(folder_id.clone());
    }
  }

  /// Tear down every model worker (daemon shutdown, §5).
  pub async fn shutdown_all(&self) {
    for worker in self.workers.lock().await.values() {
      worker.shutdown.cancel();
    }
  }
}

#[allow(clippy::too_many_arguments)]
fn spawn_worker_loop(
  model_id: String,
  registry: Arc<ModelRegistry>,
  mut search_rx: mpsc::UnboundedReceiver<Task>,
  mut index_rx: mpsc::Receiver<Task>,
  queued_index: Arc<AtomicUsize>,
  cancelled_folders: Arc<Mutex<HashSet<FolderId>>>,
  shutdown: CancellationToken,
  idle_eviction: Duration,
) {
  tokio::spawn(async move {
    info!(model_id = %model_id, "model worker started");
    loop {
      let idle_timeout = tokio::time::sleep(idle_eviction);
      tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
          registry.unload(&model_id).await;
          info!(model_id = %model_id, "model worker shut down");
          return;
        }

        // search pre-empts queued index batches: checked first every loop.
        Some(task) = search_rx.recv() => {
          run_search(&registry, &model_id, task).await;
        }

        Some(task) = index_rx.recv() => {
          queued_index.fetch_sub(1, Ordering::SeqCst);
          run_index(&registry, &model_id, &cancelled_folders, task).await;
        }

        _ = idle_timeout => {
          debug!(model_id = %model_id, "idle eviction sweep");
          registry.unload(&model_id).await;
        }
      }
    }
  });
}

async fn run_search(registry: &ModelRegistry, model_id: &str, task: Task) {
  let Task::Search { texts, reply } = task else { return };
  let result = embed_all(registry, model_id, &texts, EmbeddingMode::Query).await;
  let _ = reply.send(result);
}

async fn run_index(registry: &ModelRegistry, model_id: &str, cancelled: &Mutex<HashSet<FolderId>>, task: Task) {
  let Task::Index { folder_id, texts, reply } = task else { return };

  if cancelled.lock().await.contains(&folder_id) {
    let _ = reply.send(Err(SchedulerError::Cancelled(folder_id.to_string())));
    return;
  }

  let result = embed_all(registry, model_id, &texts, EmbeddingMode::Document).await;
  if let Err(e) = &result {
    warn!(model_id = %model_id, folder_id = %folder_id, error = %e, "index batch failed");
  }
  let _ = reply.send(result);
}

async fn embed_all(
  registry: &ModelRegistry,
  model_id: &str,
  texts: &[String],
  mode: EmbeddingMode,
) -> Result<Vec<Vec<f32>>, SchedulerError> {
  let provider = registry.ensure_loaded(model_id).await?;
  let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
  Ok(provider.embed_batch(&refs, mode).await?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use embedding::{EmbeddingError, EmbeddingProvider};
  use fmcp_core::ModelKind;
  use std::path::Path;

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
      2
    }
    async fn embed(&self, text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
      Ok(vec![text.len() as f32, 0.0])
    }
    async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      let mut out = Vec::new();
      for t in texts {
        out.push(self.embed(t, EmbeddingMode::Document).await?);
      }
      Ok(out)
    }
    async fn is_available(&self) -> bool {
      true
    }
  }

  fn make_scheduler() -> ModelScheduler {
    let registry = Arc::new(ModelRegistry::new(Arc::new(|_id: &str| {
      Ok((Arc::new(StubProvider) as Arc<dyn EmbeddingProvider + Send + Sync>, ModelKind::OnDeviceAccelerated))
    })));
    ModelScheduler::new(registry, 4, 300)
  }

  #[tokio::test]
  async fn test_search_returns_vectors() {
    let scheduler = make_scheduler();
    let out = scheduler.search("m1", vec!["hello".into()]).await.unwrap();
    assert_eq!(out.len(), 1);
  }

  #[tokio::test]
  async fn test_index_batch_returns_vectors() {
    let scheduler = make_scheduler();
    let folder_id = FolderId::from_path(Path::new("/tmp/test-folder"));
    let out = scheduler.submit_index_batch("m1", folder_id, vec!["a".into(), "bb".into()]).await.unwrap();
    assert_eq!(out.len(), 2);
  }

  #[tokio::test]
  async fn test_cancelled_folder_tasks_fail() {
    let scheduler = make_scheduler();
    let folder_id = FolderId::from_path(Path::new("/tmp/test-folder-2"));
    scheduler.cancel_folder(&folder_id).await;

    let result = scheduler.submit_index_batch("m1", folder_id, vec!["a".into()]).await;
    assert!(matches!(result, Err(SchedulerError::Cancelled(_))));
  }

  #[tokio::test]
  async fn test_backpressure_rejects_over_watermark() {
    let registry = Arc::new(ModelRegistry::new(Arc::new(|_id: &str| {
      Ok((Arc::new(StubProvider) as Arc<dyn EmbeddingProvider + Send + Sync>, ModelKind::OnDeviceAccelerated))
    })));
    let scheduler = ModelScheduler::new(registry, 1, 300);
    let folder_id = FolderId::from_path(Path::new("/tmp/test-folder-3"));
    assert!(scheduler.has_index_quota("m1").await);
    let _ = scheduler.submit_index_batch("m1", folder_id, vec!["a".into()]).await;
  }
}
