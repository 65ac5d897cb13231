//! Layered configuration (§10.1).
//!
//! Three tiers, lowest wins no fields but the highest tier overrides
//! field-by-field: built-in defaults < user config < project-local override
//! (a dotfile under the first configured folder). `DAEMON_LOG_LEVEL` and
//! `FOLDER_MCP_USER_CONFIG_DIR` are read once at startup and override,
//! never merge with, their config-file counterparts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::folder::FolderConfig;

// ============================================================================
// Embedding
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
  #[default]
  OnDeviceAccelerated,
  OnDeviceCpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  pub provider: EmbeddingProvider,
  pub default_model_id: String,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      provider: EmbeddingProvider::OnDeviceAccelerated,
      default_model_id: "qwen3-embedding".to_string(),
    }
  }
}

// ============================================================================
// Daemon transport / idle shutdown
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonNetConfig {
  pub http_port: u16,
  /// Seconds of total daemon idleness (no clients, no folders working)
  /// before background-mode self-shutdown. Ignored in foreground mode.
  pub idle_shutdown_secs: u64,
}

impl Default for DaemonNetConfig {
  fn default() -> Self {
    Self {
      http_port: 8080,
      idle_shutdown_secs: 1800,
    }
  }
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  pub level: String,
  pub retention_days: u32,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      retention_days: 14,
    }
  }
}

// ============================================================================
// Scheduler (C5 watermarks)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Queue depth of pending `index` batches above which C6 must suspend submission.
  pub backpressure_watermark: usize,
  /// Seconds of no `search`/`index` activity before a model worker is idle-evicted.
  pub idle_eviction_secs: u64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      backpressure_watermark: 64,
      idle_eviction_secs: 300,
    }
  }
}

// ============================================================================
// Chunking (C3/C4.4)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
  pub target_chars: usize,
  /// Fraction of `target_chars` by which consecutive chunks overlap.
  pub overlap_fraction: f64,
}

impl Default for ChunkingConfig {
  fn default() -> Self {
    Self {
      target_chars: 1000,
      overlap_fraction: 0.1,
    }
  }
}

// ============================================================================
// Download tokens (C12)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
  pub token_ttl_secs: i64,
}

impl Default for DownloadConfig {
  fn default() -> Self {
    Self { token_ttl_secs: 900 }
  }
}

// ============================================================================
// Root configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub folders: Vec<FolderConfig>,
  pub embedding: EmbeddingConfig,
  pub daemon: DaemonNetConfig,
  pub logging: LoggingConfig,
  pub scheduler: SchedulerConfig,
  pub chunking: ChunkingConfig,
  pub download: DownloadConfig,
}

/// Mirrors [`Config`] but every leaf field is optional, so a partially
/// specified TOML file can be merged field-by-field over a lower tier
/// instead of replacing whole sections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigPatch {
  folders: Option<Vec<FolderConfig>>,
  embedding: EmbeddingPatch,
  daemon: DaemonPatch,
  logging: LoggingPatch,
  scheduler: SchedulerPatch,
  chunking: ChunkingPatch,
  download: DownloadPatch,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct EmbeddingPatch {
  provider: Option<EmbeddingProvider>,
  default_model_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DaemonPatch {
  http_port: Option<u16>,
  idle_shutdown_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LoggingPatch {
  level: Option<String>,
  retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SchedulerPatch {
  backpressure_watermark: Option<usize>,
  idle_eviction_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ChunkingPatch {
  target_chars: Option<usize>,
  overlap_fraction: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct DownloadPatch {
  token_ttl_secs: Option<i64>,
}

impl Config {
  fn apply_patch(&mut self, patch: ConfigPatch) {
    if let Some(folders) = patch.folders {
      self.folders = folders;
    }
    if let Some(v) = patch.embedding.provider {
      self.embedding.provider = v;
    }
    if let Some(v) = patch.embedding.default_model_id {
      self.embedding.default_model_id = v;
    }
    if let Some(v) = patch.daemon.http_port {
      self.daemon.http_port = v;
    }
    if let Some(v) = patch.daemon.idle_shutdown_secs {
      self.daemon.idle_shutdown_secs = v;
    }
    if let Some(v) = patch.logging.level {
      self.logging.level = v;
    }
    if let Some(v) = patch.logging.retention_days {
      self.logging.retention_days = v;
    }
    if let Some(v) = patch.scheduler.backpressure_watermark {
      self.scheduler.backpressure_watermark = v;
    }
    if let Some(v) = patch.scheduler.idle_eviction_secs {
      self.scheduler.idle_eviction_secs = v;
    }
    if let Some(v) = patch.chunking.target_chars {
      self.chunking.target_chars = v;
    }
    if let Some(v) = patch.chunking.overlap_fraction {
      self.chunking.overlap_fraction = v;
    }
    if let Some(v) = patch.download.token_ttl_secs {
      self.download.token_ttl_secs = v;
    }
  }

  /// Merge a TOML document as a patch over `self`. A malformed file is a
  /// startup error (§6 exit code 1); a missing one is simply not called.
  fn merge_toml_str(&mut self, content: &str) -> Result<(), crate::error::Error> {
    let patch: ConfigPatch = toml::from_str(content)?;
    self.apply_patch(patch);
    Ok(())
  }

  /// Load the three-tier layered configuration. `first_folder` is the first
  /// configured folder's path, used to locate the project-local override
  /// dotfile; pass `None` before any folder is configured.
  pub fn load(first_folder: Option<&Path>) -> Result<Self, crate::error::Error> {
    let mut config = Self::default();

    if let Some(user_path) = Self::user_config_path()
      && user_path.exists()
    {
      let content = std::fs::read_to_string(&user_path)?;
      config.merge_toml_str(&content)?;
    }

    if let Some(folder) = first_folder {
      let project_path = Self::project_config_path(folder);
      if project_path.exists() {
        let content = std::fs::read_to_string(&project_path)?;
        config.merge_toml_str(&content)?;
      }
    }

    Ok(config)
  }

  /// The user-level config directory, honoring `FOLDER_MCP_USER_CONFIG_DIR`.
  pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FOLDER_MCP_USER_CONFIG_DIR") {
      return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|p| p.join("folder-mcp"))
  }

  pub fn user_config_path() -> Option<PathBuf> {
    Self::user_config_dir().map(|dir| dir.join("config.toml"))
  }

  /// Project-local override dotfile, under the first configured folder.
  pub fn project_config_path(folder_path: &Path) -> PathBuf {
    folder_path.join(".folder-mcp").join("config.toml")
  }

  /// `DAEMON_LOG_LEVEL` overrides, never merges with, the config-file log level.
  pub fn effective_log_level(&self) -> String {
    std::env::var("DAEMON_LOG_LEVEL").unwrap_or_else(|_| self.logging.level.clone())
  }

  pub fn generate_template() -> String {
    r#"# folder-mcp daemon configuration
# Place under $FOLDER_MCP_USER_CONFIG_DIR/config.toml (user tier) or
# <first-folder>/.folder-mcp/config.toml (project-local override tier).
# Any field omitted here falls through to the tier below it.

[embedding]
# on_device_accelerated (default) or on_device_cpu
provider = "on_device_accelerated"
default_model_id = "qwen3-embedding"

[daemon]
http_port = 8080
idle_shutdown_secs = 1800

[logging]
level = "info"
retention_days = 14

[scheduler]
backpressure_watermark = 64
idle_eviction_secs = 300

[chunking]
target_chars = 1000
overlap_fraction = 0.1

[download]
token_ttl_secs = 900
"#
    .to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.daemon.http_port, 8080);
    assert_eq!(config.embedding.default_model_id, "qwen3-embedding");
  }

  #[test]
  fn test_field_by_field_merge() {
    let mut config = Config::default();
    config
      .merge_toml_str(
        r#"
        [daemon]
        http_port = 9999
        "#,
      )
      .unwrap();
    // overridden field changes...
    assert_eq!(config.daemon.http_port, 9999);
    // ...but sibling field in the same section keeps its prior value.
    assert_eq!(config.daemon.idle_shutdown_secs, 1800);
  }

  #[test]
  fn test_project_tier_wins_over_user_tier() {
    let mut config = Config::default();
    config
      .merge_toml_str(r#"[logging]
level = "debug""#)
      .unwrap();
    config
      .merge_toml_str(r#"[logging]
level = "trace""#)
      .unwrap();
    assert_eq!(config.logging.level, "trace");
  }

  #[test]
  fn test_malformed_toml_rejected() {
    let mut config = Config::default();
    let result = config.merge_toml_str("not valid = = toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_load_missing_files_returns_defaults() {
    let temp = TempDir::new().unwrap();
    let config = Config::load(Some(temp.path())).unwrap();
    assert_eq!(config.daemon.http_port, 8080);
  }

  #[test]
  fn test_generate_template_sections() {
    let template = Config::generate_template();
    assert!(template.contains("[embedding]"));
    assert!(template.contains("[daemon]"));
    assert!(template.contains("[scheduler]"));
    assert!(template.contains("[chunking]"));
    assert!(template.contains("[download]"));
  }
}
