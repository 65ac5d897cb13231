//! Embedding model registry (C4, §4.2).
//!
//! Owns the process-wide `model id -> loaded handle` map. `ensure_loaded`
//! never holds the map's lock across the provider's own init work: it takes
//! the lock, either returns an existing handle or installs a `Loading`
//! placeholder, drops the lock, does the (possibly slow) init out of line,
//! then re-locks to publish the result (§5: "two-phase check: lock ->
//! placeholder -> unlock -> init -> re-lock -> publish").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fmcp_core::model::{ModelDescriptor, ModelKind};
use tokio::sync::{Mutex, Notify};

use crate::{EmbeddingError, EmbeddingProvider};

/// A factory that builds a fresh, unloaded provider for a model id. Supplied
/// by the caller (the daemon) so the registry stays agnostic of which
/// provider backends (Ollama, OpenRouter, ...) exist.
pub type ProviderFactory =
  Arc<dyn Fn(&str) -> Result<(Arc<dyn EmbeddingProvider + Send + Sync>, ModelKind), EmbeddingError> + Send + Sync>;

enum Slot {
  /// Another caller is already initializing this model; waiters subscribe
  /// to `ready` instead of starting a second init (the singleton invariant).
  Loading { ready: Arc<Notify> },
  Loaded(Arc<dyn EmbeddingProvider + Send + Sync>),
}

struct Entry {
  slot: Slot,
  kind: ModelKind,
  expected_dimensions: usize,
  last_use: Option<chrono::DateTime<Utc>>,
}

/// Process-wide embedding model registry.
pub struct ModelRegistry {
  entries: Mutex<HashMap<String, Entry>>,
  factory: ProviderFactory,
}

impl ModelRegistry {
  pub fn new(factory: ProviderFactory) -> Self {
    Self { entries: Mutex::new(HashMap::new()), factory }
  }

  /// Returns a loaded handle for `id`, initializing it if necessary.
  /// Concurrent callers for the same `id` share one initialization.
  pub async fn ensure_loaded(&self, id: &str) -> Result<Arc<dyn EmbeddingProvider + Send + Sync>, EmbeddingError> {
    loop {
      let wait_on = {
        let mut entries = self.entries.lock().await;
        match entries.get(id) {
          Some(Entry { slot: Slot::Loaded(provider), .. }) => return Ok(provider.clone()),
          Some(Entry { slot: Slot::Loading { ready }, .. }) => Some(ready.clone()),
          None => {
            entries.insert(
              id.to_string(),
              Entry {
                slot: Slot::Loading { ready: Arc::new(Notify::new()) },
                kind: ModelKind::OnDeviceAccelerated,
                expected_dimensions: 0,
                last_use: None,
              },
            );
            None
          }
        }
      };

      if let Some(ready) = wait_on {
        ready.notified().await;
        continue;
      }

      // We're the one that installed the placeholder: do the (possibly
      // slow) init with the lock released, then re-lock to publish.
      let init_result = (self.factory)(id);

      let mut entries = self.entries.lock().await;
      let ready = match entries.get(id) {
        Some(Entry { slot: Slot::Loading { ready }, .. }) => ready.clone(),
        _ => unreachable!("placeholder installed above must still be Loading"),
      };

      return match init_result {
        Ok((provider, kind)) => {
          entries.insert(
            id.to_string(),
            Entry { slot: Slot::Loaded(provider.clone()), kind, expected_dimensions: provider.dimensions(), last_use: None },
          );
          ready.notify_waiters();
          Ok(provider)
        }
        Err(e) => {
          entries.remove(id);
          ready.notify_waiters();
          Err(e)
        }
      };
    }
  }

  /// Cheap check of whether a model has already been loaded; does not load it.
  pub async fn probe_installed(&self, id: &str) -> bool {
    matches!(self.entries.lock().await.get(id), Some(Entry { slot: Slot::Loaded(_), .. }))
  }

  /// Releases a loaded model's resources. The next `ensure_loaded` restarts it.
  pub async fn unload(&self, id: &str) {
    self.entries.lock().await.remove(id);
  }

  /// Records that `id` was just used by a `search` or `index` task, for the
  /// scheduler's idle-eviction sweep (§4.3 rule 3).
  pub async fn record_use(&self, id: &str) {
    if let Some(entry) = self.entries.lock().await.get_mut(id) {
      entry.last_use = Some(Utc::now());
    }
  }

  /// Descriptors for every model the registry currently knows about.
  pub async fn list(&self) -> Vec<ModelDescriptor> {
    self
      .entries
      .lock()
      .await
      .iter()
      .map(|(id, entry)| ModelDescriptor {
        id: id.clone(),
        kind: entry.kind,
        expected_dimensions: entry.expected_dimensions,
        installed: true,
        loaded: matches!(entry.slot, Slot::Loaded(_)),
        last_use: entry.last_use,
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::EmbeddingMode;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct StubProvider {
    id: String,
  }

  #[async_trait]
  impl EmbeddingProvider for StubProvider {
    fn name(&self) -> &str {
      "stub"
    }
    fn model_id(&self) -> &str {
      &self.id
    }
    fn dimensions(&self) -> usize {
      4
    }
    async fn embed(&self, _text: &str, _mode: EmbeddingMode) -> Result<Vec<f32>, EmbeddingError> {
      Ok(vec![0.0; 4])
    }
    async fn embed_batch(&self, texts: &[&str], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
    }
    async fn is_available(&self) -> bool {
      true
    }
  }

  fn counting_factory(calls: Arc<AtomicUsize>) -> ProviderFactory {
    Arc::new(move |id: &str| {
      calls.fetch_add(1, Ordering::SeqCst);
      let provider: Arc<dyn EmbeddingProvider + Send + Sync> = Arc::new(StubProvider { id: id.to_string() });
      Ok((provider, ModelKind::OnDeviceCpu))
    })
  }

  #[tokio::test]
  async fn test_ensure_loaded_is_singleton() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ModelRegistry::new(counting_factory(calls.clone()));

    let a = registry.ensure_loaded("m1").await.unwrap();
    let b = registry.ensure_loaded("m1").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1, "second ensure_loaded must not re-init");
    assert_eq!(a.model_id(), b.model_id());
  }

  #[tokio::test]
  async fn test_concurrent_ensure_loaded_inits_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(ModelRegistry::new(counting_factory(calls.clone())));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let registry = registry.clone();
        tokio::spawn(async move { registry.ensure_loaded("m1").await.unwrap() })
      })
      .collect();

    for h in handles {
      h.await.unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1, "concurrent callers for the same id share one init");
  }

  #[tokio::test]
  async fn test_unload_then_ensure_loaded_reinitializes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ModelRegistry::new(counting_factory(calls.clone()));

    registry.ensure_loaded("m1").await.unwrap();
    registry.unload("m1").await;
    registry.ensure_loaded("m1").await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_probe_installed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ModelRegistry::new(counting_factory(calls));

    assert!(!registry.probe_installed("m1").await);
    registry.ensure_loaded("m1").await.unwrap();
    assert!(registry.probe_installed("m1").await);
  }

  #[tokio::test]
  async fn test_list_reports_loaded_descriptor() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = ModelRegistry::new(counting_factory(calls));
    registry.ensure_loaded("m1").await.unwrap();

    let list = registry.list().await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, "m1");
    assert!(list[0].loaded);
    assert_eq!(list[0].expected_dimensions, 4);
  }
}
