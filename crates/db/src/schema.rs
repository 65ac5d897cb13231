use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

fn vector_field(vector_dim: usize) -> Field {
  Field::new(
    "vector",
    DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
    true,
  )
}

/// Schema for the `documents` table: one row per indexed file, carrying the
/// document-level embedding (weighted mean of its chunks' vectors, §3).
pub fn documents_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("folder_id", DataType::Utf8, false),
    Field::new("path", DataType::Utf8, false),
    Field::new("size", DataType::UInt64, false),
    Field::new("mime_type", DataType::Utf8, false),
    Field::new("last_modified", DataType::Int64, false),
    Field::new("content_hash", DataType::Utf8, false),
    Field::new("extraction_metadata", DataType::Utf8, false), // JSON object
    Field::new("keywords", DataType::Utf8, false),            // JSON array of KeyPhrase
    Field::new("indexed_at", DataType::Int64, false),
    Field::new("embedding_model_id", DataType::Utf8, true),
    vector_field(vector_dim),
  ]))
}

/// Schema for the `chunks` table: one row per chunk, with its embedding
/// colocated so a chunk and its vector are always written in one transaction
/// (§3 invariant: chunk embeddings are 1:1 and immutable once persisted).
pub fn chunks_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("id", DataType::Utf8, false),
    Field::new("document_id", DataType::Utf8, false),
    Field::new("folder_id", DataType::Utf8, false),
    Field::new("chunk_index", DataType::UInt32, false),
    Field::new("content", DataType::Utf8, false),
    Field::new("start_byte", DataType::UInt64, false),
    Field::new("end_byte", DataType::UInt64, false),
    Field::new("key_phrases", DataType::Utf8, false), // JSON array of KeyPhrase
    Field::new("readability", DataType::Float64, false),
    Field::new("has_code", DataType::Boolean, false),
    Field::new("embedding_model_id", DataType::Utf8, false),
    vector_field(vector_dim),
  ]))
}

/// Schema for the `index_checkpoints` table: one row per folder, tracking
/// files already persisted so a restart can resume without re-embedding
/// already-indexed documents (§4.1 restart recovery).
pub fn index_checkpoints_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("folder_id", DataType::Utf8, false),
    Field::new("processed_files", DataType::Utf8, false), // JSON array of paths
    Field::new("pending_files", DataType::Utf8, false),   // JSON array of paths
    Field::new("total_files", DataType::UInt32, false),
    Field::new("processed_count", DataType::UInt32, false),
    Field::new("error_count", DataType::UInt32, false),
    Field::new("started_at", DataType::Int64, false),
    Field::new("updated_at", DataType::Int64, false),
    Field::new("is_complete", DataType::Boolean, false),
  ]))
}

/// Default vector dimensions, matching the default embedding model's output width.
pub const DEFAULT_VECTOR_DIM: usize = 1024;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_documents_schema() {
    let schema = documents_schema(768);
    assert!(schema.field_with_name("id").is_ok());
    assert!(schema.field_with_name("path").is_ok());
    assert!(schema.field_with_name("vector").is_ok());
  }

  #[test]
  fn test_chunks_schema() {
    let schema = chunks_schema(768);
    assert!(schema.field_with_name("document_id").is_ok());
    assert!(schema.field_with_name("start_byte").is_ok());
    assert!(schema.field_with_name("vector").is_ok());
  }

  #[test]
  fn test_index_checkpoints_schema() {
    let schema = index_checkpoints_schema();
    assert!(schema.field_with_name("folder_id").is_ok());
    assert!(schema.field_with_name("pending_files").is_ok());
  }
}
