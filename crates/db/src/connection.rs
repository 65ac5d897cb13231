use fmcp_core::FolderId;
use lancedb::{Connection, connect};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{DEFAULT_VECTOR_DIM, chunks_schema, documents_schema, index_checkpoints_schema};

#[derive(Error, Debug)]
pub enum DbError {
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Per-folder on-disk vector database (C1). Every configured folder owns
/// exactly one of these, keyed by its [`FolderId`].
pub struct FolderDb {
  pub folder_id: FolderId,
  pub path: PathBuf,
  pub connection: Connection,
  pub vector_dim: usize,
}

impl FolderDb {
  /// Open or create a folder's database under `base_path`.
  pub async fn open(folder_id: FolderId, base_path: &std::path::Path) -> Result<Self> {
    let db_path = folder_id.data_dir(base_path).join("lancedb");
    Self::open_at_path(folder_id, db_path, DEFAULT_VECTOR_DIM).await
  }

  /// Open a database at an explicit path (tests, or a caller managing layout itself).
  pub async fn open_at_path(folder_id: FolderId, db_path: PathBuf, vector_dim: usize) -> Result<Self> {
    if let Some(parent) = db_path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    info!("Opening LanceDB at {:?}", db_path);
    let connection = connect(db_path.to_string_lossy().as_ref()).execute().await?;

    let db = Self {
      folder_id,
      path: db_path,
      connection,
      vector_dim,
    };

    db.ensure_tables().await?;

    Ok(db)
  }

  async fn ensure_tables(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;

    if !table_names.contains(&"documents".to_string()) {
      debug!("Creating documents table");
      self
        .connection
        .create_empty_table("documents", documents_schema(self.vector_dim))
        .execute()
        .await?;
    }

    if !table_names.contains(&"chunks".to_string()) {
      debug!("Creating chunks table");
      self
        .connection
        .create_empty_table("chunks", chunks_schema(self.vector_dim))
        .execute()
        .await?;
    }

    if !table_names.contains(&"index_checkpoints".to_string()) {
      debug!("Creating index_checkpoints table");
      self
        .connection
        .create_empty_table("index_checkpoints", index_checkpoints_schema())
        .execute()
        .await?;
    }

    Ok(())
  }

  pub async fn documents_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("documents").execute().await?)
  }

  pub async fn chunks_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("chunks").execute().await?)
  }

  pub async fn index_checkpoints_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("index_checkpoints").execute().await?)
  }
}

/// Base data directory under which every folder's `FolderId::data_dir` is rooted.
///
/// Respects `FOLDER_MCP_DATA_DIR`, then `XDG_DATA_HOME`, then the platform default.
pub fn default_data_dir() -> PathBuf {
  if let Ok(dir) = std::env::var("FOLDER_MCP_DATA_DIR") {
    return PathBuf::from(dir);
  }

  if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(xdg_data).join("folder-mcp");
  }

  dirs::data_local_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("folder-mcp")
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;
  use std::sync::Mutex;
  use tempfile::TempDir;

  static ENV_MUTEX: Mutex<()> = Mutex::new(());

  #[tokio::test]
  async fn test_open_database() {
    let temp_dir = TempDir::new().unwrap();
    let folder_id = FolderId::from_path(Path::new("/test/project"));

    let db = FolderDb::open_at_path(folder_id.clone(), temp_dir.path().join("test.lancedb"), 768)
      .await
      .unwrap();

    assert_eq!(db.folder_id.as_str(), folder_id.as_str());
  }

  #[tokio::test]
  async fn test_tables_created() {
    let temp_dir = TempDir::new().unwrap();
    let folder_id = FolderId::from_path(Path::new("/test/project"));

    let db = FolderDb::open_at_path(folder_id, temp_dir.path().join("test.lancedb"), 768)
      .await
      .unwrap();

    let tables = db.connection.table_names().execute().await.unwrap();
    assert!(tables.contains(&"documents".to_string()));
    assert!(tables.contains(&"chunks".to_string()));
    assert!(tables.contains(&"index_checkpoints".to_string()));
  }

  #[test]
  fn test_env_override_data_dir() {
    let _guard = ENV_MUTEX.lock().unwrap();
    let original = std::env::var("FOLDER_MCP_DATA_DIR").ok();

    unsafe {
      std::env::set_var("FOLDER_MCP_DATA_DIR", "/custom/data/path");
    }
    let dir = default_data_dir();
    assert_eq!(dir, PathBuf::from("/custom/data/path"));

    if let Some(orig) = original {
      unsafe {
        std::env::set_var("FOLDER_MCP_DATA_DIR", orig);
      }
    } else {
      unsafe {
        std::env::remove_var("FOLDER_MCP_DATA_DIR");
      }
    }
  }
}
