//! Data model for documents and chunks (§3 of the folder-indexing spec).
//!
//! These types are the shared vocabulary between the indexing pipeline, the
//! document store, and the query service. Chunking itself (splitting text
//! into overlapping byte ranges) lives in the `index` crate; this module only
//! owns the data shapes and the overlap-aware reconstruction rule that both
//! the pipeline and the query service depend on.

use crate::keyphrase::KeyPhrase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a document (newtype for type safety).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
  pub fn new() -> Self {
    Self(Uuid::now_v7())
  }

  pub fn from_uuid(id: Uuid) -> Self {
    Self(id)
  }

  pub fn as_uuid(&self) -> Uuid {
    self.0
  }
}

impl Default for DocumentId {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Display for DocumentId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl std::str::FromStr for DocumentId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self(Uuid::parse_str(s)?))
  }
}

/// A document known to one folder's store.
///
/// Identity within a folder store is the full path. Re-created (new id,
/// fresh chunks) whenever `content_hash` changes; deleted when the file
/// disappears or the folder is removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
  pub id: DocumentId,

  /// Full path of the source file, relative to the folder root.
  pub path: String,

  pub size: u64,
  pub mime_type: String,
  pub last_modified: DateTime<Utc>,

  /// Content hash used to detect changes between scans.
  pub content_hash: String,

  /// Opaque per-format extraction metadata (outline, page count, ...).
  pub extraction_metadata: serde_json::Value,

  /// Document-level keywords: union of chunk key phrases with frequency scoring.
  pub keywords: Vec<KeyPhrase>,

  pub indexed_at: DateTime<Utc>,
}

impl Document {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    path: String,
    size: u64,
    mime_type: String,
    last_modified: DateTime<Utc>,
    content_hash: String,
    extraction_metadata: serde_json::Value,
  ) -> Self {
    Self {
      id: DocumentId::new(),
      path,
      size,
      mime_type,
      last_modified,
      content_hash,
      extraction_metadata,
      keywords: Vec::new(),
      indexed_at: Utc::now(),
    }
  }
}

/// A chunk of a document's extracted text.
///
/// Immutable once persisted. Chunks of one document form a contiguous,
/// gapless index range `[0..N-1]`; bulk-deleted and replaced whenever the
/// parent document is re-indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
  pub id: DocumentId,
  pub document_id: DocumentId,

  /// 0-based, gapless within a document.
  pub chunk_index: usize,

  pub content: String,

  /// Byte offsets into the document's extracted text. `start < end`;
  /// consecutive chunks may overlap the previous chunk by ~10%.
  pub start_byte: usize,
  pub end_byte: usize,

  pub key_phrases: Vec<KeyPhrase>,
  pub readability: f64,
  pub has_code: bool,
}

impl Chunk {
  #[allow(clippy::too_many_arguments)]
  pub fn new(document_id: DocumentId, chunk_index: usize, content: String, start_byte: usize, end_byte: usize) -> Self {
    Self {
      id: DocumentId::new(),
      document_id,
      chunk_index,
      content,
      start_byte,
      end_byte,
      key_phrases: Vec::new(),
      readability: 0.0,
      has_code: false,
    }
  }
}

/// A chunk's embedding vector (1:1 with the chunk). Written in the same
/// transaction as the chunk: a chunk exists iff its embedding exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEmbedding {
  pub chunk_id: DocumentId,
  pub vector: Vec<f32>,
  pub model_id: String,
}

/// A document's embedding (1:1), derived as the weighted mean of its
/// chunks' embeddings (weighted by chunk byte length, re-normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEmbedding {
  pub document_id: DocumentId,
  pub vector: Vec<f32>,
  pub model_id: String,
}

/// Reconstruct the original extracted text from an ordered, overlap-aware
/// sequence of chunks (§4.6). `chunks` must already be sorted by
/// `chunk_index`. Yields the original text byte-for-byte when the chunks
/// were produced by the overlap-aware chunker.
pub fn reconstruct_text<'a, I>(chunks: I) -> String
where
  I: IntoIterator<Item = &'a Chunk>,
{
  let mut out = String::new();
  let mut last_end: usize = 0;

  for chunk in chunks {
    if chunk.start_byte >= last_end {
      out.push_str(&chunk.content);
    } else {
      let skip = last_end - chunk.start_byte;
      // Chunks are built on char boundaries by the chunker; `skip` indexes
      // into `chunk.content` which starts at `chunk.start_byte`.
      let content_bytes = chunk.content.as_bytes();
      if skip < content_bytes.len() {
        // Find the nearest char boundary at or after `skip`.
        let mut boundary = skip;
        while boundary < chunk.content.len() && !chunk.content.is_char_boundary(boundary) {
          boundary += 1;
        }
        out.push_str(&chunk.content[boundary..]);
      }
    }
    last_end = chunk.end_byte;
  }

  out
}
