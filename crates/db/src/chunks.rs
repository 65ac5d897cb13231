//! Chunk storage (C1, C6 Persist stage).
//!
//! A chunk and its embedding are written in a single [`FolderDb::add_chunk`]
//! call so the two are never observably out of sync (§3: "chunk embedding is
//! always computed together with its chunk and stored in the same
//! transaction"). Chunks are immutable once persisted: there is no update,
//! only add and delete.

use arrow_array::{
  Array, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, RecordBatch, RecordBatchIterator, StringArray,
  UInt32Array, UInt64Array,
};
use fmcp_core::{Chunk, ChunkEmbedding, DocumentId, FolderId, KeyPhrase};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use crate::connection::{DbError, FolderDb, Result};
use crate::schema::chunks_schema;

impl FolderDb {
  /// Persist a chunk together with its embedding.
  pub async fn add_chunk(&self, chunk: &Chunk, embedding: &ChunkEmbedding) -> Result<()> {
    let table = self.chunks_table().await?;
    let batch = chunk_to_batch(chunk, embedding, self.folder_id.as_str(), self.vector_dim)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema(self.vector_dim));
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  /// Persist many chunks in one batch (C6 bulk pipeline preset).
  pub async fn add_chunks(&self, pairs: &[(Chunk, ChunkEmbedding)]) -> Result<()> {
    if pairs.is_empty() {
      return Ok(());
    }

    let table = self.chunks_table().await?;
    let batches: Vec<RecordBatch> = pairs
      .iter()
      .map(|(chunk, embedding)| chunk_to_batch(chunk, embedding, self.folder_id.as_str(), self.vector_dim))
      .collect::<Result<Vec<_>>>()?;

    let schema = chunks_schema(self.vector_dim);
    let iter = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
    table.add(Box::new(iter)).execute().await?;
    Ok(())
  }

  pub async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
    let table = self.chunks_table().await?;

    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("id = '{}'", id))
      .execute()
      .await?
      .try_collect()
      .await?;

    if results.is_empty() || results[0].num_rows() == 0 {
      return Ok(None);
    }

    Ok(Some(batch_to_chunk(&results[0], 0)?))
  }

  /// All chunks of a document, ordered by `chunk_index` (gapless, per §3).
  pub async fn list_chunks(&self, document_id: &DocumentId) -> Result<Vec<Chunk>> {
    let table = self.chunks_table().await?;

    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("document_id = '{}'", document_id))
      .execute()
      .await?
      .try_collect()
      .await?;

    let mut chunks = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        chunks.push(batch_to_chunk(batch, i)?);
      }
    }
    chunks.sort_by_key(|c| c.chunk_index);
    Ok(chunks)
  }

  /// Vector search over chunk embeddings, returning `(chunk, distance)` pairs.
  /// Distance is cosine distance (`1 - cosine_similarity`).
  pub async fn search_chunks(&self, query_vector: &[f32], limit: usize) -> Result<Vec<(Chunk, f32)>> {
    let table = self.chunks_table().await?;

    let results: Vec<RecordBatch> = table
      .vector_search(query_vector.to_vec())?
      .distance_type(DistanceType::Cosine)
      .limit(limit)
      .execute()
      .await?
      .try_collect()
      .await?;

    let mut out = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        let chunk = batch_to_chunk(batch, i)?;
        let distance = batch
          .column_by_name("_distance")
          .and_then(|col| col.as_any().downcast_ref::<Float32Array>())
          .map(|arr| arr.value(i))
          .unwrap_or(f32::MAX);
        out.push((chunk, distance));
      }
    }
    Ok(out)
  }

  pub async fn delete_chunks_for_document(&self, document_id: &DocumentId) -> Result<()> {
    let table = self.chunks_table().await?;
    table.delete(&format!("document_id = '{}'", document_id)).await?;
    Ok(())
  }

  pub async fn count_chunks(&self, document_id: Option<&DocumentId>) -> Result<usize> {
    let table = self.chunks_table().await?;
    let filter = document_id.map(|id| format!("document_id = '{}'", id));
    Ok(table.count_rows(filter).await?)
  }
}

fn chunk_to_batch(chunk: &Chunk, embedding: &ChunkEmbedding, folder_id: &str, vector_dim: usize) -> Result<RecordBatch> {
  let id = StringArray::from(vec![chunk.id.to_string()]);
  let document_id = StringArray::from(vec![chunk.document_id.to_string()]);
  let folder_id = StringArray::from(vec![folder_id.to_string()]);
  let chunk_index = UInt32Array::from(vec![chunk.chunk_index as u32]);
  let content = StringArray::from(vec![chunk.content.clone()]);
  let start_byte = UInt64Array::from(vec![chunk.start_byte as u64]);
  let end_byte = UInt64Array::from(vec![chunk.end_byte as u64]);
  let key_phrases = StringArray::from(vec![serde_json::to_string(&chunk.key_phrases)?]);
  let readability = Float64Array::from(vec![chunk.readability]);
  let has_code = BooleanArray::from(vec![chunk.has_code]);
  let embedding_model_id = StringArray::from(vec![embedding.model_id.clone()]);

  let mut vec_padded = embedding.vector.clone();
  vec_padded.resize(vector_dim, 0.0);
  let field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(Float32Array::from(vec_padded)), None)?;

  let batch = RecordBatch::try_new(
    chunks_schema(vector_dim),
    vec![
      Arc::new(id),
      Arc::new(document_id),
      Arc::new(folder_id),
      Arc::new(chunk_index),
      Arc::new(content),
      Arc::new(start_byte),
      Arc::new(end_byte),
      Arc::new(key_phrases),
      Arc::new(readability),
      Arc::new(has_code),
      Arc::new(embedding_model_id),
      Arc::new(vector_list),
    ],
  )?;

  Ok(batch)
}

fn batch_to_chunk(batch: &RecordBatch, row: usize) -> Result<Chunk> {
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
  let get_u64 = |name: &str| -> Result<u64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };
  let get_f64 = |name: &str| -> Result<f64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
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

  let id_str = get_string("id")?;
  let document_id_str = get_string("document_id")?;
  let key_phrases_json = get_string("key_phrases")?;
  let key_phrases: Vec<KeyPhrase> = serde_json::from_str(&key_phrases_json)?;

  Ok(Chunk {
    id: id_str.parse().map_err(|_| DbError::NotFound("invalid chunk id".into()))?,
    document_id: document_id_str
      .parse()
      .map_err(|_| DbError::NotFound("invalid document_id".into()))?,
    chunk_index: get_u32("chunk_index")? as usize,
    content: get_string("content")?,
    start_byte: get_u64("start_byte")? as usize,
    end_byte: get_u64("end_byte")? as usize,
    key_phrases,
    readability: get_f64("readability")?,
    has_code: get_bool("has_code")?,
  })
}

/// Convenience alias, mirroring core's naming for folders that address
/// tables without going through [`FolderDb::folder_id`] directly.
pub fn folder_filter(folder_id: &FolderId) -> String {
  format!("folder_id = '{}'", folder_id.as_str())
}

#[cfg(test)]
mod tests {
  use super::*;
  use fmcp_core::DocumentId;
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

  fn make_chunk(document_id: DocumentId, index: usize) -> (Chunk, ChunkEmbedding) {
    let chunk = Chunk::new(document_id, index, format!("chunk body {index}"), index * 100, index * 100 + 50);
    let embedding = ChunkEmbedding {
      chunk_id: chunk.id,
      vector: vec![0.1; 8],
      model_id: "test-model".to_string(),
    };
    (chunk, embedding)
  }

  #[tokio::test]
  async fn test_add_and_get_chunk() {
    let (_temp, db) = create_test_db().await;
    let document_id = DocumentId::new();
    let (chunk, embedding) = make_chunk(document_id, 0);

    db.add_chunk(&chunk, &embedding).await.unwrap();

    let retrieved = db.get_chunk(&chunk.id.to_string()).await.unwrap().unwrap();
    assert_eq!(retrieved.content, chunk.content);
  }

  #[tokio::test]
  async fn test_list_chunks_ordered_by_index() {
    let (_temp, db) = create_test_db().await;
    let document_id = DocumentId::new();

    for i in [2, 0, 1] {
      let (chunk, embedding) = make_chunk(document_id, i);
      db.add_chunk(&chunk, &embedding).await.unwrap();
    }

    let chunks = db.list_chunks(&document_id).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(), vec![0, 1, 2]);
  }

  #[tokio::test]
  async fn test_delete_chunks_for_document() {
    let (_temp, db) = create_test_db().await;
    let document_id = DocumentId::new();
    let (chunk, embedding) = make_chunk(document_id, 0);
    db.add_chunk(&chunk, &embedding).await.unwrap();

    db.delete_chunks_for_document(&document_id).await.unwrap();
    assert_eq!(db.count_chunks(Some(&document_id)).await.unwrap(), 0);
  }
}
