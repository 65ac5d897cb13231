//! Hybrid content search (C11 `search-content`, §4.8, §9).
//!
//! `FolderDb::search_chunks` runs lancedb's vector search with
//! [`lancedb::DistanceType::Cosine`], so the `_distance` column it returns is
//! cosine distance (`1 - cosine_similarity`); `semantic_score` converts that
//! back to a cosine similarity via `1.0 - distance`.
//! That similarity is then boosted by exact query-term matches:
//! `score = semantic_score * 1.5^exact_matches`. The boost is applied
//! uniformly, including to a perfect `1.0` semantic score, so scores are not
//! upper-bounded at `1.0` — this mirrors the resolved open question on
//! keeping search ranking unbounded rather than clamping it (see DESIGN.md).
//! The candidate pool is over-fetched at a fixed 2x `limit` before re-ranking.

use fmcp_core::{Chunk, DocumentId};

use crate::connection::{FolderDb, Result};

/// One scored hit from [`FolderDb::search_content`].
#[derive(Debug, Clone)]
pub struct ScoredChunk {
  pub chunk: Chunk,
  pub document_id: DocumentId,
  pub score: f64,
}

const OVER_FETCH_FACTOR: usize = 2;
const EXACT_MATCH_BOOST: f64 = 1.5;

impl FolderDb {
  /// Hybrid search: semantic similarity re-ranked by exact query-term matches.
  pub async fn search_content(&self, query_vector: &[f32], query_text: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
    let pool = self.search_chunks(query_vector, limit * OVER_FETCH_FACTOR).await?;

    let terms: Vec<String> = query_text
      .split_whitespace()
      .map(|t| t.to_lowercase())
      .filter(|t| !t.is_empty())
      .collect();

    let mut scored: Vec<ScoredChunk> = pool
      .into_iter()
      .map(|(chunk, distance)| {
        let semantic_score = (1.0 - distance as f64).max(0.0);
        let exact_matches = count_exact_matches(&chunk.content, &terms);
        let score = semantic_score * EXACT_MATCH_BOOST.powi(exact_matches as i32);
        let document_id = chunk.document_id;
        ScoredChunk { chunk, document_id, score }
      })
      .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
  }
}

/// Total count of query terms found (case-insensitively, by substring) in `content`.
fn count_exact_matches(content: &str, terms: &[String]) -> usize {
  let lower = content.to_lowercase();
  terms.iter().filter(|term| lower.contains(term.as_str())).count()
}
