//! Daemon process lifecycle (§5, §10.3).
//!
//! Owns startup (config load, provider wiring, folder registry population),
//! steady state (FMDM fan-out, idle-shutdown sweep), and shutdown (folder
//! teardown, model worker teardown) for the whole process. [`crate::http`]
//! and [`crate::ws`] borrow an `Arc<Daemon>` as their shared state rather than
//! duplicating its collaborators.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use embedding::{ModelRegistry, OllamaProvider, ProviderFactory, wrap_resilient_arc};
use fmcp_core::folder::{FolderConfig, FolderId, FolderRuntimeState};
use fmcp_core::model::ModelKind;
use fmcp_core::token::DownloadTokenIssuer;
use fmcp_core::{Config, EmbeddingConfig, EmbeddingProvider as ConfigEmbeddingProvider};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::broadcaster::Broadcaster;
use crate::download::DownloadUrlSigner;
use crate::fmdm::FmdmStore;
use crate::folder_manager::FolderManager;
use crate::model_scheduler::ModelScheduler;
use crate::query::{FolderRegistry, QueryService};

/// Fallback embedding dimensionality for models the registry has no prior
/// descriptor for. The real value is learned from the provider's first
/// response; this only sizes the initial vector column.
const DEFAULT_MODEL_DIMENSIONS: usize = 1024;
/// How often the idle-shutdown sweep re-checks activity (§5, background mode only).
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("configuration error: {0}")]
  Config(#[from] fmcp_core::Error),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("opening folder {0}: {1}")]
  FolderOpen(PathBuf, db::DbError),
}

/// Build the registry's [`ProviderFactory`]: on-device model ids all resolve
/// to a local Ollama instance, retried through [`wrap_resilient_arc`] the way
/// a flaky local service warrants (§9 "embedding providers are unreliable
/// neighbors, not infrastructure"); `config.embedding.provider` only changes
/// which [`ModelKind`] the registry reports for introspection, since both
/// variants are on-device today.
fn build_provider_factory(config: &EmbeddingConfig) -> ProviderFactory {
  let kind = match config.provider {
    ConfigEmbeddingProvider::OnDeviceAccelerated => ModelKind::OnDeviceAccelerated,
    ConfigEmbeddingProvider::OnDeviceCpu => ModelKind::OnDeviceCpu,
  };
  let ollama_url = std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());

  Arc::new(move |model_id: &str| {
    let provider = OllamaProvider::new().with_url(ollama_url.clone()).with_model(model_id.to_string(), DEFAULT_MODEL_DIMENSIONS);
    Ok((wrap_resilient_arc(provider), kind))
  })
}

/// The whole running daemon (§10.3). Cheap to clone via `Arc<Daemon>`; every
/// field is itself an `Arc` or primitive so handlers never need their own copy.
pub struct Daemon {
  pub config: Config,
  pub registry: Arc<ModelRegistry>,
  pub scheduler: Arc<ModelScheduler>,
  pub folders: Arc<FolderRegistry>,
  pub fmdm: Arc<FmdmStore>,
  pub broadcaster: Arc<Broadcaster>,
  pub signer: Arc<DownloadUrlSigner>,
  pub query: Arc<QueryService>,
  background: bool,
  shutdown: CancellationToken,
  last_activity: Mutex<Instant>,
  state_rx: Mutex<Option<mpsc::UnboundedReceiver<FolderRuntimeState>>>,
  state_tx: mpsc::UnboundedSender<FolderRuntimeState>,
}

impl Daemon {
  pub fn new(config: Config, version: impl Into<String>, background: bool) -> Self {
    let factory = build_provider_factory(&config.embedding);
    let registry = Arc::new(ModelRegistry::new(factory));
    let scheduler = Arc::new(ModelScheduler::new(registry.clone(), config.scheduler.backpressure_watermark, config.scheduler.idle_eviction_secs));
    let signer = Arc::new(DownloadUrlSigner::new(DownloadTokenIssuer::generate(), config.download.token_ttl_secs));
    let folders: Arc<FolderRegistry> = Arc::new(RwLock::new(HashMap::new()));
    let fmdm = Arc::new(FmdmStore::new(version));
    let broadcaster = Arc::new(Broadcaster::new());
    let query = Arc::new(QueryService::new(folders.clone(), scheduler.clone(), signer.clone()));
    let (state_tx, state_rx) = mpsc::unbounded_channel();

    Self {
      config,
      registry,
      scheduler,
      folders,
      fmdm,
      broadcaster,
      signer,
      query,
      background,
      shutdown: CancellationToken::new(),
      last_activity: Mutex::new(Instant::now()),
      state_rx: Mutex::new(Some(state_rx)),
      state_tx,
    }
  }

  pub fn shutdown_token(&self) -> CancellationToken {
    self.shutdown.clone()
  }

  /// Record HTTP/WS activity for the background idle-shutdown sweep (§5).
  pub fn touch_activity(&self) {
    *self.last_activity.lock().unwrap() = Instant::now();
  }

  /// Open every configured folder, spawn its lifecycle routine, and start
  /// the daemon-wide background routines. Call once, before serving traffic.
  pub async fn start(self: &Arc<Self>) -> Result<(), LifecycleError> {
    let base_data_dir = db::default_data_dir();

    for folder_config in self.config.folders.clone() {
      self.open_folder(folder_config, &base_data_dir).await?;
    }

    self.broadcaster.clone().spawn_poll_loop(self.fmdm.clone(), self.shutdown.clone());
    self.spawn_state_fanout();
    self.spawn_idle_sweep();

    Ok(())
  }

  async fn open_folder(&self, folder_config: FolderConfig, base_data_dir: &std::path::Path) -> Result<(), LifecycleError> {
    let folder_id = folder_config.id();
    let path = folder_config.path.clone();
    let fm = FolderManager::open(folder_config, base_data_dir, self.registry.clone(), self.scheduler.clone(), self.config.chunking.clone(), self.state_tx.clone())
      .await
      .map_err(|e| LifecycleError::FolderOpen(path, e))?;
    let fm = Arc::new(fm);

    self.folders.write().await.insert(folder_id, fm.clone());
    tokio::spawn(fm.run());
    Ok(())
  }

  /// Add a folder at runtime (WS `add_folder`, §6).
  pub async fn add_folder(&self, path: PathBuf, model_id: String) -> Result<(), LifecycleError> {
    let base_data_dir = db::default_data_dir();
    self.open_folder(FolderConfig::new(path, model_id), &base_data_dir).await
  }

  /// Remove a folder at runtime (WS `remove_folder`, §6).
  pub async fn remove_folder(&self, folder_id: &FolderId) {
    let fm = self.folders.write().await.remove(folder_id);
    if let Some(fm) = fm {
      fm.remove().await;
    }
  }

  /// Fan every folder manager's state update into a fresh FMDM snapshot
  /// (C9/C10 glue, §4.7: "any mutation produces a new FMDM snapshot").
  fn spawn_state_fanout(self: &Arc<Self>) {
    let mut rx = self.state_rx.lock().unwrap().take().expect("state fanout already started");
    let daemon = self.clone();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = daemon.shutdown.cancelled() => return,
          update = rx.recv() => {
            if update.is_none() {
              return;
            }
            let folders: Vec<FolderRuntimeState> = daemon.folders.read().await.values().map(|fm| fm.snapshot()).collect();
            daemon.fmdm.set_folders(folders);
            daemon.fmdm.set_models(daemon.registry.list().await);
          }
        }
      }
    });
  }

  /// Background-mode self-shutdown once the daemon has gone idle for
  /// `config.daemon.idle_shutdown_secs` (§5; a no-op in foreground mode,
  /// where the owning terminal session is the lifetime signal instead).
  fn spawn_idle_sweep(self: &Arc<Self>) {
    if !self.background {
      return;
    }
    let daemon = self.clone();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = daemon.shutdown.cancelled() => return,
          _ = tokio::time::sleep(IDLE_SWEEP_INTERVAL) => {}
        }
        let idle_secs = daemon.last_activity.lock().unwrap().elapsed().as_secs();
        if idle_secs >= daemon.config.daemon.idle_shutdown_secs {
          info!(idle_secs, "idle timeout reached, shutting down");
          daemon.shutdown.cancel();
          return;
        }
      }
    });
  }

  /// Tear down every folder and model worker (§5 graceful shutdown).
  pub async fn shutdown(&self) {
    self.shutdown.cancel();
    let ids: Vec<FolderId> = self.folders.read().await.keys().cloned().collect();
    for id in ids {
      self.remove_folder(&id).await;
    }
    self.scheduler.shutdown_all().await;
  }
}

/// Check whether a daemon is already listening on `http_port` (used by the
/// CLI before deciding to spawn a new process, §10.4).
pub fn is_running(http_port: u16) -> bool {
  std::net::TcpStream::connect_timeout(&([127, 0, 0, 1], http_port).into(), Duration::from_millis(300)).is_ok()
}

/// Runtime/lock directory for the PID file, honoring `XDG_RUNTIME_DIR` the
/// way `Config::user_config_dir` honors `FOLDER_MCP_USER_CONFIG_DIR`.
pub fn pid_file_path() -> PathBuf {
  if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
    PathBuf::from(runtime_dir).join("folder-mcp.pid")
  } else {
    PathBuf::from(std::env::temp_dir()).join("folder-mcp.pid")
  }
}

pub fn write_pid_file() -> Result<(), std::io::Error> {
  std::fs::write(pid_file_path(), std::process::id().to_string())
}

pub fn remove_pid_file() {
  let _ = std::fs::remove_file(pid_file_path());
}
