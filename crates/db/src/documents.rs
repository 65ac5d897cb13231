//! Document metadata storage and document-level vector search (C1, C11 find-documents).
//!
//! A document is inserted once extraction completes (content hash, size,
//! mime type, extraction metadata known) and its embedding is attached once
//! C6's Embed stage computes the weighted mean of its chunks (§9: recomputed
//! on any chunk change, including partial re-indexing of a single document).

use arrow_array::{
  Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt64Array,
};
use chrono::{TimeZone, Utc};
use fmcp_core::{Document, DocumentEmbedding, DocumentId, KeyPhrase};
use futures::TryStreamExt;
use lancedb::DistanceType;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use crate::connection::{DbError, FolderDb, Result};
use crate::schema::documents_schema;

impl FolderDb {
  /// Insert or replace a document's metadata row. Does not touch its
  /// embedding column unless `embedding` is provided; pass `None` to leave a
  /// previously stored embedding untouched (e.g. metadata-only updates).
  pub async fn upsert_document(&self, doc: &Document, embedding: Option<&DocumentEmbedding>) -> Result<()> {
    let table = self.documents_table().await?;
    table.delete(&format!("id = '{}'", doc.id)).await.ok();

    let batch = document_to_batch(doc, embedding, self.folder_id.as_str(), self.vector_dim)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], documents_schema(self.vector_dim));
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  pub async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
    let table = self.documents_table().await?;

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

    Ok(Some(batch_to_document(&results[0], 0)?))
  }

  pub async fn get_document_by_path(&self, path: &str) -> Result<Option<Document>> {
    let table = self.documents_table().await?;
    let escaped = path.replace('\'', "''");

    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("path = '{}'", escaped))
      .execute()
      .await?
      .try_collect()
      .await?;

    if results.is_empty() || results[0].num_rows() == 0 {
      return Ok(None);
    }

    Ok(Some(batch_to_document(&results[0], 0)?))
  }

  pub async fn list_documents(&self) -> Result<Vec<Document>> {
    let table = self.documents_table().await?;
    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;

    let mut docs = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        docs.push(batch_to_document(batch, i)?);
      }
    }
    Ok(docs)
  }

  pub async fn delete_document(&self, id: &DocumentId) -> Result<()> {
    let table = self.documents_table().await?;
    table.delete(&format!("id = '{}'", id)).await?;
    Ok(())
  }

  pub async fn delete_document_by_path(&self, path: &str) -> Result<()> {
    let table = self.documents_table().await?;
    let escaped = path.replace('\'', "''");
    table.delete(&format!("path = '{}'", escaped)).await?;
    Ok(())
  }

  pub async fn count_documents(&self) -> Result<usize> {
    let table = self.documents_table().await?;
    Ok(table.count_rows(None).await?)
  }

  /// Nearest-neighbor search over document-level embeddings (C11 find-documents).
  /// Distance is cosine distance (`1 - cosine_similarity`).
  pub async fn search_documents(&self, query_vector: &[f32], limit: usize) -> Result<Vec<(Document, f32)>> {
    let table = self.documents_table().await?;

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
        let doc = batch_to_document(batch, i)?;
        let distance = batch
          .column_by_name("_distance")
          .and_then(|col| col.as_any().downcast_ref::<Float32Array>())
          .map(|arr| arr.value(i))
          .unwrap_or(f32::MAX);
        out.push((doc, distance));
      }
    }
    Ok(out)
  }
}

fn document_to_batch(
  doc: &Document,
  embedding: Option<&DocumentEmbedding>,
  folder_id: &str,
  vector_dim: usize,
) -> Result<RecordBatch> {
  let id = StringArray::from(vec![doc.id.to_string()]);
  let folder_id = StringArray::from(vec![folder_id.to_string()]);
  let path = StringArray::from(vec![doc.path.clone()]);
  let size = UInt64Array::from(vec![doc.size]);
  let mime_type = StringArray::from(vec![doc.mime_type.clone()]);
  let last_modified = Int64Array::from(vec![doc.last_modified.timestamp_millis()]);
  let content_hash = StringArray::from(vec![doc.content_hash.clone()]);
  let extraction_metadata = StringArray::from(vec![doc.extraction_metadata.to_string()]);
  let keywords = StringArray::from(vec![serde_json::to_string(&doc.keywords)?]);
  let indexed_at = Int64Array::from(vec![doc.indexed_at.timestamp_millis()]);
  let embedding_model_id = StringArray::from(vec![embedding.map(|e| e.model_id.clone())]);

  let mut vec_values = embedding.map(|e| e.vector.clone()).unwrap_or_default();
  vec_values.resize(vector_dim, 0.0);
  let field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let null_mask = if embedding.is_some() { None } else { Some(vec![false].into()) };
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(Float32Array::from(vec_values)), null_mask)?;

  let batch = RecordBatch::try_new(
    documents_schema(vector_dim),
    vec![
      Arc::new(id),
      Arc::new(folder_id),
      Arc::new(path),
      Arc::new(size),
      Arc::new(mime_type),
      Arc::new(last_modified),
      Arc::new(content_hash),
      Arc::new(extraction_metadata),
      Arc::new(keywords),
      Arc::new(indexed_at),
      Arc::new(embedding_model_id),
      Arc::new(vector_list),
    ],
  )?;

  Ok(batch)
}

fn batch_to_document(batch: &RecordBatch, row: usize) -> Result<Document> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {}", name)))
  };
  let get_u64 = |name: &str| -> Result<u64> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
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

  let id_str = get_string("id")?;
  let keywords_json = get_string("keywords")?;
  let keywords: Vec<KeyPhrase> = serde_json::from_str(&keywords_json)?;
  let extraction_metadata: serde_json::Value =
    serde_json::from_str(&get_string("extraction_metadata")?).unwrap_or(serde_json::Value::Null);

  let last_modified = Utc
    .timestamp_millis_opt(get_i64("last_modified")?)
    .single()
    .ok_or_else(|| DbError::NotFound("invalid last_modified timestamp".into()))?;
  let indexed_at = Utc
    .timestamp_millis_opt(get_i64("indexed_at")?)
    .single()
    .ok_or_else(|| DbError::NotFound("invalid indexed_at timestamp".into()))?;

  Ok(Document {
    id: id_str.parse().map_err(|_| DbError::NotFound("invalid document id".into()))?,
    path: get_string("path")?,
    size: get_u64("size")?,
    mime_type: get_string("mime_type")?,
    last_modified,
    content_hash: get_string("content_hash")?,
    extraction_metadata,
    keywords,
    indexed_at,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use fmcp_core::FolderId;
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

  fn make_doc(path: &str) -> Document {
    Document::new(
      path.to_string(),
      1000,
      "text/markdown".to_string(),
      Utc::now(),
      "hash123".to_string(),
      serde_json::json!({}),
    )
  }

  #[tokio::test]
  async fn test_upsert_and_get_document() {
    let (_temp, db) = create_test_db().await;
    let doc = make_doc("notes/a.md");

    db.upsert_document(&doc, None).await.unwrap();

    let retrieved = db.get_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(retrieved.path, doc.path);
    assert_eq!(retrieved.content_hash, doc.content_hash);
  }

  #[tokio::test]
  async fn test_get_document_by_path() {
    let (_temp, db) = create_test_db().await;
    let doc = make_doc("notes/b.md");
    db.upsert_document(&doc, None).await.unwrap();

    let retrieved = db.get_document_by_path(&doc.path).await.unwrap().unwrap();
    assert_eq!(retrieved.id, doc.id);
  }

  #[tokio::test]
  async fn test_upsert_with_embedding() {
    let (_temp, db) = create_test_db().await;
    let doc = make_doc("notes/c.md");
    let embedding = DocumentEmbedding {
      document_id: doc.id,
      vector: vec![0.2; 8],
      model_id: "test-model".to_string(),
    };

    db.upsert_document(&doc, Some(&embedding)).await.unwrap();
    let found = db.search_documents(&[0.2; 8], 5).await.unwrap();
    assert!(found.iter().any(|(d, _)| d.id == doc.id));
  }

  #[tokio::test]
  async fn test_delete_document() {
    let (_temp, db) = create_test_db().await;
    let doc = make_doc("notes/d.md");
    db.upsert_document(&doc, None).await.unwrap();
    db.delete_document(&doc.id).await.unwrap();
    assert!(db.get_document(&doc.id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_list_and_count_documents() {
    let (_temp, db) = create_test_db().await;
    db.upsert_document(&make_doc("a.md"), None).await.unwrap();
    db.upsert_document(&make_doc("b.md"), None).await.unwrap();

    assert_eq!(db.count_documents().await.unwrap(), 2);
    assert_eq!(db.list_documents().await.unwrap().len(), 2);
  }
}
