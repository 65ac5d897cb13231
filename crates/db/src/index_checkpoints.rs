//! Index checkpoints for resuming interrupted bulk indexing (§4.1 restart recovery).
//!
//! One checkpoint per folder: on restart the lifecycle manager reads it to
//! skip files already persisted rather than re-extracting and re-embedding
//! the whole folder.

use arrow_array::{Array, BooleanArray, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array};
use chrono::{DateTime, TimeZone, Utc};
use fmcp_core::FolderId;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::connection::{DbError, FolderDb, Result};
use crate::schema::index_checkpoints_schema;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexCheckpoint {
  pub folder_id: String,
  pub processed_files: HashSet<String>,
  pub pending_files: Vec<String>,
  pub total_files: u32,
  pub processed_count: u32,
  pub error_count: u32,
  pub started_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub is_complete: bool,
}

impl IndexCheckpoint {
  pub fn new(folder_id: &FolderId, pending_files: Vec<String>) -> Self {
    let now = Utc::now();
    let total = pending_files.len() as u32;
    Self {
      folder_id: folder_id.as_str().to_string(),
      processed_files: HashSet::new(),
      pending_files,
      total_files: total,
      processed_count: 0,
      error_count: 0,
      started_at: now,
      updated_at: now,
      is_complete: false,
    }
  }

  pub fn mark_processed(&mut self, file_path: &str) {
    self.processed_files.insert(file_path.to_string());
    self.pending_files.retain(|f| f != file_path);
    self.processed_count += 1;
    self.updated_at = Utc::now();
  }

  pub fn mark_error(&mut self, file_path: &str) {
    self.pending_files.retain(|f| f != file_path);
    self.error_count += 1;
    self.updated_at = Utc::now();
  }

  pub fn mark_complete(&mut self) {
    self.is_complete = true;
    self.updated_at = Utc::now();
  }

  pub fn has_pending(&self) -> bool {
    !self.pending_files.is_empty()
  }

  pub fn progress_percent(&self) -> f32 {
    if self.total_files == 0 {
      return 100.0;
    }
    ((self.processed_count + self.error_count) as f32 / self.total_files as f32) * 100.0
  }
}

impl FolderDb {
  pub async fn save_checkpoint(&self, checkpoint: &IndexCheckpoint) -> Result<()> {
    let table = self.index_checkpoints_table().await?;
    let batch = checkpoint_to_batch(checkpoint)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], index_checkpoints_schema());

    let _ = table.delete(&format!("folder_id = '{}'", checkpoint.folder_id)).await;
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  pub async fn get_checkpoint(&self, folder_id: &FolderId) -> Result<Option<IndexCheckpoint>> {
    let table = self.index_checkpoints_table().await?;

    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("folder_id = '{}'", folder_id.as_str()))
      .execute()
      .await?
      .try_collect()
      .await?;

    if results.is_empty() || results[0].num_rows() == 0 {
      return Ok(None);
    }

    Ok(Some(batch_to_checkpoint(&results[0], 0)?))
  }

  pub async fn clear_checkpoint(&self, folder_id: &FolderId) -> Result<()> {
    let table = self.index_checkpoints_table().await?;
    table.delete(&format!("folder_id = '{}'", folder_id.as_str())).await?;
    Ok(())
  }
}

fn checkpoint_to_batch(checkpoint: &IndexCheckpoint) -> Result<RecordBatch> {
  let folder_id = StringArray::from(vec![checkpoint.folder_id.clone()]);
  let processed_files = StringArray::from(vec![serde_json::to_string(
    &checkpoint.processed_files.iter().collect::<Vec<_>>(),
  )?]);
  let pending_files = StringArray::from(vec![serde_json::to_string(&checkpoint.pending_files)?]);
  let total_files = UInt32Array::from(vec![checkpoint.total_files]);
  let processed_count = UInt32Array::from(vec![checkpoint.processed_count]);
  let error_count = UInt32Array::from(vec![checkpoint.error_count]);
  let started_at = Int64Array::from(vec![checkpoint.started_at.timestamp_millis()]);
  let updated_at = Int64Array::from(vec![checkpoint.updated_at.timestamp_millis()]);
  let is_complete = BooleanArray::from(vec![checkpoint.is_complete]);

  let batch = RecordBatch::try_new(
    index_checkpoints_schema(),
    vec![
      Arc::new(folder_id),
      Arc::new(processed_files),
      Arc::new(pending_files),
      Arc::new(total_files),
      Arc::new(processed_count),
      Arc::new(error_count),
      Arc::new(started_at),
      Arc::new(updated_at),
      Arc::new(is_complete),
    ],
  )?;

  Ok(batch)
}

fn batch_to_checkpoint(batch: &RecordBatch, row: usize) -> Result<IndexCheckpoint> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };
  let get_u32 = |name: &str| -> Result<u32> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };
  let get_i64 = |name: &str| -> Result<i64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };
  let get_bool = |name: &str| -> Result<bool> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };

  let processed_files: Vec<String> = serde_json::from_str(&get_string("processed_files")?)?;
  let pending_files: Vec<String> = serde_json::from_str(&get_string("pending_files")?)?;

  let started_at = Utc
    .timestamp_millis_opt(get_i64("started_at")?)
    .single()
    .ok_or_else(|| DbError::NotFound("invalid started_at timestamp".into()))?;
  let updated_at = Utc
    .timestamp_millis_opt(get_i64("updated_at")?)
    .single()
    .ok_or_else(|| DbError::NotFound("invalid updated_at timestamp".into()))?;

  Ok(IndexCheckpoint {
    folder_id: get_string("folder_id")?,
    processed_files: processed_files.into_iter().collect(),
    pending_files,
    total_files: get_u32("total_files")?,
    processed_count: get_u32("processed_count")?,
    error_count: get_u32("error_count")?,
    started_at,
    updated_at,
    is_complete: get_bool("is_complete")?,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;
  use tempfile::TempDir;

  async fn create_test_db() -> (TempDir, FolderDb) {
    let temp_dir = TempDir::new().unwrap();
    let folder_id = FolderId::from_path(Path::new("/test"));
    let db = FolderDb::open_at_path(folder_id, temp_dir.path().join("test.lancedb"), 8)
      .await
      .unwrap();
    (temp_dir, db)
  }

  #[tokio::test]
  async fn test_save_and_get_checkpoint() {
    let (_temp, db) = create_test_db().await;
    let folder_id = FolderId::from_path(Path::new("/test"));

    let files = vec!["a.md".to_string(), "b.md".to_string(), "c.md".to_string()];
    let checkpoint = IndexCheckpoint::new(&folder_id, files);
    db.save_checkpoint(&checkpoint).await.unwrap();

    let retrieved = db.get_checkpoint(&folder_id).await.unwrap().unwrap();
    assert_eq!(retrieved.total_files, 3);
    assert_eq!(retrieved.pending_files.len(), 3);
  }

  #[tokio::test]
  async fn test_checkpoint_progress() {
    let (_temp, db) = create_test_db().await;
    let folder_id = FolderId::from_path(Path::new("/test"));

    let files = vec!["a.md".to_string(), "b.md".to_string(), "c.md".to_string(), "d.md".to_string()];
    let mut checkpoint = IndexCheckpoint::new(&folder_id, files);
    checkpoint.mark_processed("a.md");
    checkpoint.mark_processed("b.md");
    checkpoint.mark_error("c.md");
    db.save_checkpoint(&checkpoint).await.unwrap();

    let retrieved = db.get_checkpoint(&folder_id).await.unwrap().unwrap();
    assert_eq!(retrieved.processed_count, 2);
    assert_eq!(retrieved.error_count, 1);
    assert_eq!(retrieved.pending_files, vec!["d.md".to_string()]);
    assert!((retrieved.progress_percent() - 75.0).abs() < 0.01);
  }

  #[tokio::test]
  async fn test_clear_checkpoint() {
    let (_temp, db) = create_test_db().await;
    let folder_id = FolderId::from_path(Path::new("/test"));

    let checkpoint = IndexCheckpoint::new(&folder_id, vec!["x.md".to_string()]);
    db.save_checkpoint(&checkpoint).await.unwrap();
    db.clear_checkpoint(&folder_id).await.unwrap();

    assert!(db.get_checkpoint(&folder_id).await.unwrap().is_none());
  }
}
