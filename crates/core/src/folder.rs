//! Folder identity, configuration, and lifecycle state (§3, §4.1).

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Stable identifier for a configured folder, derived from its absolute path.
///
/// Unlike a source-control-aware project identity, folder identity here is
/// exact: two different paths always get different ids, even if one is a
/// subdirectory of the other. The daemon manages folders by the paths the
/// user configured, not by walking up to some enclosing repository root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(String);

impl FolderId {
  pub fn from_path(path: &Path) -> Self {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.to_string_lossy().hash(&mut hasher);
    FolderId(format!("{:016x}", hasher.finish()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Directory under the daemon's data directory holding this folder's
  /// registry bookkeeping (not the document store itself, which lives under
  /// the folder's own `.folder-mcp/` subdirectory per §6).
  pub fn data_dir(&self, base: &Path) -> PathBuf {
    base.join("folders").join(&self.0)
  }
}

impl std::fmt::Display for FolderId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Folder configuration as held by the configuration collaborator (§3).
/// The core treats this as read-only except when editing the folder set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
  pub path: PathBuf,
  pub model_id: String,
  pub created_at: chrono::DateTime<chrono::Utc>,
}

impl FolderConfig {
  pub fn new(path: PathBuf, model_id: String) -> Self {
    Self {
      path,
      model_id,
      created_at: chrono::Utc::now(),
    }
  }

  pub fn id(&self) -> FolderId {
    FolderId::from_path(&self.path)
  }
}

/// The per-folder state machine (§4.1).
///
/// Ordering matters: FMDM snapshots observed by a single client must never
/// regress across `pending < downloading_model < scanning < ready <
/// indexing < indexed < watching` (a state may repeat; it may never go
/// backward). `Error` and `Removed` are absorbing states reachable from any
/// other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
  Pending,
  DownloadingModel,
  Scanning,
  Ready,
  Indexing,
  Indexed,
  Watching,
  Error,
  Removed,
}

impl LifecycleState {
  /// Rank used to check monotonicity of the happy-path progression. `Error`
  /// and `Removed` are not part of the ordered sequence (they are terminal
  /// states reachable from anywhere).
  fn happy_path_rank(self) -> Option<u8> {
    match self {
      LifecycleState::Pending => Some(0),
      LifecycleState::DownloadingModel => Some(1),
      LifecycleState::Scanning => Some(2),
      LifecycleState::Ready => Some(3),
      LifecycleState::Indexing => Some(4),
      LifecycleState::Indexed => Some(5),
      LifecycleState::Watching => Some(6),
      LifecycleState::Error | LifecycleState::Removed => None,
    }
  }

  /// Whether `self -> next` is consistent with the monotonic happy-path
  /// ordering (equal or forward, or a transition in/out of an absorbing
  /// state). Used by tests asserting FMDM monotonicity (§8).
  pub fn is_monotonic_transition(self, next: LifecycleState) -> bool {
    match (self.happy_path_rank(), next.happy_path_rank()) {
      (Some(a), Some(b)) => b >= a,
      // Absorbing states, or recovery-from-watching back into indexing on
      // a debounced change, are always allowed.
      _ => true,
    }
  }
}

/// Mutable runtime state for one configured folder (§3), owned exclusively
/// by the lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRuntimeState {
  pub path: PathBuf,
  pub model_id: String,
  pub state: LifecycleState,

  /// Fraction in `[0, 1]` during `indexing`/`downloading_model`, `None` otherwise.
  pub progress: Option<f64>,

  pub last_error: Option<String>,
  pub last_indexed_at: Option<chrono::DateTime<chrono::Utc>>,
  pub document_count: u64,
  pub chunk_count: u64,

  /// Ordered, not-yet-delivered per-document notifications (extraction or
  /// chunk-embed failures that did not fail the folder).
  pub pending_notifications: Vec<String>,
}

impl FolderRuntimeState {
  pub fn new(path: PathBuf, model_id: String) -> Self {
    Self {
      path,
      model_id,
      state: LifecycleState::Pending,
      progress: None,
      last_error: None,
      last_indexed_at: None,
      document_count: 0,
      chunk_count: 0,
      pending_notifications: Vec::new(),
    }
  }

  pub fn id(&self) -> FolderId {
    FolderId::from_path(&self.path)
  }

  /// Transition to `next`, recording diagnostics for `Error`. Panics in
  /// debug assertions if the transition would violate monotonicity; this is
  /// a programming error in the lifecycle manager, not a runtime condition.
  pub fn transition(&mut self, next: LifecycleState) {
    debug_assert!(
      self.state.is_monotonic_transition(next),
      "non-monotonic lifecycle transition: {:?} -> {:?}",
      self.state,
      next
    );
    self.state = next;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn test_folder_id_differs_for_subdir() {
    let temp = std::env::temp_dir().join(format!("core_folder_test_{}", std::process::id()));
    fs::create_dir_all(temp.join("src")).unwrap();

    let id_root = FolderId::from_path(&temp);
    let id_src = FolderId::from_path(&temp.join("src"));
    assert_ne!(id_root, id_src);

    let _ = fs::remove_dir_all(&temp);
  }

  #[test]
  fn test_lifecycle_monotonic_ordering() {
    assert!(LifecycleState::Pending.is_monotonic_transition(LifecycleState::Scanning));
    assert!(LifecycleState::Indexing.is_monotonic_transition(LifecycleState::Indexing));
    assert!(!LifecycleState::Watching.is_monotonic_transition(LifecycleState::Pending));
  }

  #[test]
  fn test_lifecycle_watching_back_to_indexing_allowed() {
    // A debounced change notification sends `watching` back to `indexing`;
    // this is outside the one-shot happy path so it must still be allowed.
    assert!(LifecycleState::Watching.is_monotonic_transition(LifecycleState::Indexing));
  }

  #[test]
  fn test_runtime_state_transition() {
    let mut state = FolderRuntimeState::new(PathBuf::from("/tmp/x"), "model-a".into());
    assert_eq!(state.state, LifecycleState::Pending);
    state.transition(LifecycleState::Scanning);
    assert_eq!(state.state, LifecycleState::Scanning);
  }
}
