//! Folder lifecycle manager (C8, §4.1).
//!
//! One [`FolderManager`] per configured folder, composing C1 (the store),
//! C6 (the indexing pipeline), C7 (the watcher), and the model registry's
//! download side-effect, and driving [`FolderRuntimeState::transition`]
//! through the states in §4.1. Runs as its own spawned task (§5 "one
//! lifecycle routine per folder").

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use db::FolderDb;
use embedding::ModelRegistry;
use fmcp_core::folder::{FolderConfig, FolderId, FolderRuntimeState, LifecycleState};
use fmcp_core::ChunkingConfig;
use index::{BatchEmbedder, ChangeKind, DebounceConfig, DebouncedWatcher, IndexingPipeline};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model_scheduler::ModelScheduler;
use crate::scheduler_embedder::SchedulerEmbedder;

/// Minimum time between FMDM progress updates during `indexing` (§4.1).
const PROGRESS_RATE_LIMIT: Duration = Duration::from_millis(250);
/// Debounce window for watcher bursts (§4.5).
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct FolderManager {
  folder_id: FolderId,
  config: FolderConfig,
  db: Arc<FolderDb>,
  pipeline: Arc<IndexingPipeline>,
  registry: Arc<ModelRegistry>,
  scheduler: Arc<ModelScheduler>,
  state: Mutex<FolderRuntimeState>,
  state_tx: mpsc::UnboundedSender<FolderRuntimeState>,
  shutdown: CancellationToken,
}

impl FolderManager {
  /// Open a folder's store and construct its manager. Does not start
  /// running the state machine; call [`Self::spawn`] for that.
  pub async fn open(
    config: FolderConfig,
    base_data_dir: &std::path::Path,
    registry: Arc<ModelRegistry>,
    scheduler: Arc<ModelScheduler>,
    chunking: ChunkingConfig,
    state_tx: mpsc::UnboundedSender<FolderRuntimeState>,
  ) -> Result<Self, db::DbError> {
    let folder_id = config.id();
    let db = Arc::new(FolderDb::open(folder_id.clone(), base_data_dir).await?);

    let embedder: Arc<dyn BatchEmbedder> = Arc::new(SchedulerEmbedder { scheduler: scheduler.clone() });
    let pipeline = Arc::new(IndexingPipeline::new(db.clone(), embedder, config.model_id.clone(), chunking));

    let document_count = db.count_documents().await.unwrap_or(0) as u64;
    let mut state = FolderRuntimeState::new(config.path.clone(), config.model_id.clone());
    // Restart recovery (§4.1): a non-empty store resumes at `scanning` so
    // drift accumulated while the daemon was down is reconciled immediately.
    if document_count > 0 {
      state.document_count = document_count;
      state.transition(LifecycleState::Scanning);
    }

    Ok(Self {
      folder_id,
      config,
      db,
      pipeline,
      registry,
      scheduler,
      state: Mutex::new(state),
      state_tx,
      shutdown: CancellationToken::new(),
    })
  }

  pub fn folder_id(&self) -> &FolderId {
    &self.folder_id
  }

  pub fn db(&self) -> &Arc<FolderDb> {
    &self.db
  }

  pub fn model_id(&self) -> &str {
    &self.config.model_id
  }

  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }

  /// Apply `f` to the current state under lock and broadcast the resulting
  /// snapshot. Synchronous so it can also be called from the indexing
  /// pipeline's plain `FnMut` progress callback (§4.1 rate-limited progress).
  fn set_state(&self, f: impl FnOnce(&mut FolderRuntimeState)) {
    let snapshot = {
      let mut state = self.state.lock().unwrap();
      f(&mut state);
      state.clone()
    };
    let _ = self.state_tx.send(snapshot);
  }

  pub fn snapshot(&self) -> FolderRuntimeState {
    self.state.lock().unwrap().clone()
  }

  /// Drive the folder through its full happy path once, then into steady-state
  /// watching. Returns once the watch loop ends (folder removed or shutdown).
  pub async fn run(self: Arc<Self>) {
    if let Err(e) = self.ensure_model_loaded().await {
      self.enter_error(format!("model load failed: {e}"));
      return;
    }

    self.set_state(|s| s.transition(LifecycleState::Scanning));
    self.set_state(|s| s.transition(LifecycleState::Ready));

    if self.shutdown.is_cancelled() {
      return;
    }

    if let Err(e) = self.index_once().await {
      self.enter_error(format!("indexing failed: {e}"));
      return;
    }

    self.set_state(|s| s.transition(LifecycleState::Watching));
    self.watch_loop().await;
  }

  async fn ensure_model_loaded(&self) -> Result<(), embedding::EmbeddingError> {
    if !self.registry.probe_installed(&self.config.model_id).await {
      self.set_state(|s| s.transition(LifecycleState::DownloadingModel));
    }
    self.registry.ensure_loaded(&self.config.model_id).await?;
    Ok(())
  }

  async fn index_once(&self) -> Result<(), index::PipelineError> {
    self.set_state(|s| s.transition(LifecycleState::Indexing));

    let mut last_update = Instant::now() - PROGRESS_RATE_LIMIT;
    let outcome = self
      .pipeline
      .run_full_scan_with_progress(&self.config.path, |done, total| {
        if total == 0 {
          return;
        }
        let now = Instant::now();
        if now.duration_since(last_update) < PROGRESS_RATE_LIMIT {
          return;
        }
        last_update = now;
        let fraction = done as f64 / total as f64;
        self.set_state(|s| s.progress = Some(fraction));
      })
      .await?;

    info!(
      folder = %self.config.path.display(),
      indexed = outcome.indexed,
      unchanged = outcome.unchanged,
      removed = outcome.removed,
      failed = outcome.failed,
      "full scan complete"
    );

    let document_count = self.db.count_documents().await.unwrap_or(0) as u64;
    let chunk_count = self.db.count_chunks(None).await.unwrap_or(0) as u64;
    self.set_state(|s| {
      s.progress = None;
      s.document_count = document_count;
      s.chunk_count = chunk_count;
      s.last_indexed_at = Some(chrono::Utc::now());
      s.transition(LifecycleState::Indexed);
    });

    Ok(())
  }

  fn enter_error(&self, reason: String) {
    warn!(folder = %self.config.path.display(), reason = %reason, "folder entering error state");
    self.set_state(|s| {
      s.last_error = Some(reason);
      s.transition(LifecycleState::Error);
    });
  }

  /// Steady-state watch loop: pauses the watcher is unnecessary here since
  /// the initial scan already completed; re-indexes individual paths as
  /// changes are debounced in (§4.5, §4.1 "watching -> indexing").
  async fn watch_loop(&self) {
    let mut watcher = match DebouncedWatcher::new(
      &self.config.path,
      DebounceConfig { file_debounce_ms: WATCH_DEBOUNCE.as_millis() as u64, ..Default::default() },
    ) {
      Ok(w) => w,
      Err(e) => {
        self.enter_error(format!("failed to start watcher: {e}"));
        return;
      }
    };

    loop {
      if self.shutdown.is_cancelled() {
        break;
      }

      let changes = watcher.collect_ready();
      if !changes.is_empty() {
        self.set_state(|s| s.transition(LifecycleState::Indexing));

        for change in changes {
          let relative = match change.path.strip_prefix(&self.config.path) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => continue,
          };

          let result = match change.kind {
            ChangeKind::Deleted => self.pipeline.remove_path(&relative).await,
            ChangeKind::Created | ChangeKind::Modified => self.pipeline.reindex_path(&self.config.path, &relative).await,
          };

          if let Err(e) = result {
            warn!(folder = %self.config.path.display(), path = %relative, error = %e, "incremental re-index failed");
            self.set_state(|s| s.pending_notifications.push(format!("{relative}: {e}")));
          }
        }

        let document_count = self.db.count_documents().await.unwrap_or(0) as u64;
        let chunk_count = self.db.count_chunks(None).await.unwrap_or(0) as u64;
        self.set_state(|s| {
          s.document_count = document_count;
          s.chunk_count = chunk_count;
          s.last_indexed_at = Some(chrono::Utc::now());
          s.transition(LifecycleState::Watching);
        });
      }

      tokio::time::sleep(Duration::from_millis(200)).await;
    }
  }

  /// Remove this folder: cancel outstanding scheduler work, stop the watch
  /// loop, and close the store (§4.1 "any state -> removed").
  pub async fn remove(&self) {
    self.shutdown.cancel();
    self.scheduler.cancel_folder(&self.folder_id).await;
    self.set_state(|s| s.transition(LifecycleState::Removed));
  }

  pub fn path(&self) -> &PathBuf {
    &self.config.path
  }
}
