//! Embedding model descriptors (§3, §4.2).

use serde::{Deserialize, Serialize};

/// The two families of embedding model implementation (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
  /// Runs in-process using on-device acceleration (e.g. a GPU/NPU runtime).
  OnDeviceAccelerated,
  /// Runs out-of-process as a child process, communicating over some IPC
  /// channel; the registry must start, health-check, and reap it.
  OnDeviceCpu,
}

/// Static and runtime information about one embedding model (§4.2 `list()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
  pub id: String,
  pub kind: ModelKind,
  pub expected_dimensions: usize,
  pub installed: bool,
  pub loaded: bool,
  pub last_use: Option<chrono::DateTime<chrono::Utc>>,
}

impl ModelDescriptor {
  pub fn new(id: impl Into<String>, kind: ModelKind, expected_dimensions: usize) -> Self {
    Self {
      id: id.into(),
      kind,
      expected_dimensions,
      installed: false,
      loaded: false,
      last_use: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_model_descriptor_defaults() {
    let d = ModelDescriptor::new("qwen3-embedding", ModelKind::OnDeviceAccelerated, 4096);
    assert!(!d.installed);
    assert!(!d.loaded);
    assert_eq!(d.expected_dimensions, 4096);
  }
}
