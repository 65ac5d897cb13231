//! Fleet model daemon map (C9, §4.7).
//!
//! The FMDM is the single authoritative snapshot of every folder's runtime
//! state, the model catalog, and daemon identity. It is replaced atomically
//! on every mutation (copy-on-write, §5) so readers — the broadcaster and
//! any HTTP handler building a `/folders` response — always see a
//! consistent, self-coherent view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use fmcp_core::model::ModelDescriptor;
use fmcp_core::FolderRuntimeState;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DaemonInfo {
  pub pid: u32,
  pub uptime_secs: u64,
  pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fmdm {
  pub folders: Vec<FolderRuntimeState>,
  pub models: Vec<ModelDescriptor>,
  pub daemon: DaemonInfo,
}

/// Owns the current [`Fmdm`] snapshot and the monotonically increasing
/// revision counter the broadcaster uses to detect "did anything change".
pub struct FmdmStore {
  current: RwLock<Arc<Fmdm>>,
  revision: AtomicU64,
  started_at: Instant,
  pid: u32,
  version: String,
}

impl FmdmStore {
  pub fn new(version: impl Into<String>) -> Self {
    let pid = std::process::id();
    let version = version.into();
    let initial = Fmdm {
      folders: Vec::new(),
      models: Vec::new(),
      daemon: DaemonInfo { pid, uptime_secs: 0, version: version.clone() },
    };
    Self { current: RwLock::new(Arc::new(initial)), revision: AtomicU64::new(0), started_at: Instant::now(), pid, version }
  }

  pub fn snapshot(&self) -> Arc<Fmdm> {
    self.current.read().unwrap().clone()
  }

  pub fn revision(&self) -> u64 {
    self.revision.load(Ordering::SeqCst)
  }

  /// Replace the folder list, bumping the revision (§4.7: "any mutation ...
  /// produces a new FMDM snapshot").
  pub fn set_folders(&self, folders: Vec<FolderRuntimeState>) {
    self.replace(|prev| Fmdm { folders, models: prev.models.clone(), daemon: self.daemon_info() });
  }

  pub fn set_models(&self, models: Vec<ModelDescriptor>) {
    self.replace(|prev| Fmdm { folders: prev.folders.clone(), models, daemon: self.daemon_info() });
  }

  fn replace(&self, f: impl FnOnce(&Fmdm) -> Fmdm) {
    let next = {
      let prev = self.current.read().unwrap();
      f(&prev)
    };
    *self.current.write().unwrap() = Arc::new(next);
    self.revision.fetch_add(1, Ordering::SeqCst);
  }

  fn daemon_info(&self) -> DaemonInfo {
    DaemonInfo { pid: self.pid, uptime_secs: self.started_at.elapsed().as_secs(), version: self.version.clone() }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use fmcp_core::folder::LifecycleState;
  use std::path::PathBuf;

  #[test]
  fn test_set_folders_bumps_revision() {
    let store = FmdmStore::new("0.1.0");
    assert_eq!(store.revision(), 0);

    let state = FolderRuntimeState::new(PathBuf::from("/tmp/a"), "m1".into());
    store.set_folders(vec![state]);

    assert_eq!(store.revision(), 1);
    assert_eq!(store.snapshot().folders.len(), 1);
    assert_eq!(store.snapshot().folders[0].state, LifecycleState::Pending);
  }

  #[test]
  fn test_snapshot_is_immutable_copy() {
    let store = FmdmStore::new("0.1.0");
    let before = store.snapshot();
    store.set_models(vec![]);
    assert_eq!(before.folders.len(), 0, "previously taken snapshot must not observe later mutation");
  }
}
