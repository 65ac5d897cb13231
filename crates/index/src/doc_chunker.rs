//! Text chunker (C3, §3, §4.4 step 3, §4.6).
//!
//! Splits extracted text into overlapping byte-range chunks. Overlap is
//! preserved so that [`fmcp_core::reconstruct_text`] round-trips the
//! original text byte-for-byte (§4.6): each chunk after the first starts
//! `overlap_fraction * target_chars` bytes before the previous chunk ended.

use fmcp_core::{Chunk, ChunkingConfig, DocumentId};

/// Splits `text` into chunks for `document_id`, per `config`.
///
/// Boundaries always land on `char` boundaries (never inside a multi-byte
/// UTF-8 sequence), so both `target_chars` and the overlap are approximate
/// in byte terms but exact in the sense that every chunk is valid UTF-8.
pub fn chunk_text(document_id: DocumentId, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
  if text.is_empty() {
    return Vec::new();
  }

  let target = config.target_chars.max(1);
  let overlap = (((target as f64) * config.overlap_fraction).round() as usize).min(target.saturating_sub(1));

  let mut chunks = Vec::new();
  let mut start = 0usize;
  let mut chunk_index = 0usize;

  while start < text.len() {
    let mut end = (start + target).min(text.len());
    end = floor_char_boundary(text, end);
    if end <= start {
      end = ceil_char_boundary(text, start + 1).min(text.len());
    }

    let content = text[start..end].to_string();
    chunks.push(Chunk::new(document_id, chunk_index, content, start, end));
    chunk_index += 1;

    if end >= text.len() {
      break;
    }

    let next_start = floor_char_boundary(text, end.saturating_sub(overlap));
    start = if next_start > start { next_start } else { ceil_char_boundary(text, start + 1) };
  }

  chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
  index = index.min(text.len());
  while index > 0 && !text.is_char_boundary(index) {
    index -= 1;
  }
  index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
  index = index.min(text.len());
  while index < text.len() && !text.is_char_boundary(index) {
    index += 1;
  }
  index
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(target_chars: usize, overlap_fraction: f64) -> ChunkingConfig {
    ChunkingConfig { target_chars, overlap_fraction }
  }

  #[test]
  fn test_empty_text_yields_no_chunks() {
    let chunks = chunk_text(DocumentId::new(), "", &config(100, 0.1));
    assert!(chunks.is_empty());
  }

  #[test]
  fn test_short_text_yields_one_chunk() {
    let text = "short document";
    let chunks = chunk_text(DocumentId::new(), text, &config(1000, 0.1));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, text);
    assert_eq!(chunks[0].start_byte, 0);
    assert_eq!(chunks[0].end_byte, text.len());
  }

  #[test]
  fn test_chunks_are_gapless_and_indexed() {
    let text = "a".repeat(2500);
    let chunks = chunk_text(DocumentId::new(), &text, &config(1000, 0.1));
    assert!(chunks.len() > 1);
    for (i, chunk) in chunks.iter().enumerate() {
      assert_eq!(chunk.chunk_index, i);
    }
  }

  #[test]
  fn test_consecutive_chunks_overlap_by_roughly_ten_percent() {
    let text = "x".repeat(5000);
    let chunks = chunk_text(DocumentId::new(), &text, &config(1000, 0.1));
    for pair in chunks.windows(2) {
      let overlap = pair[0].end_byte.saturating_sub(pair[1].start_byte);
      assert!(overlap > 0, "consecutive chunks must overlap");
      assert!(overlap <= 150, "overlap should be roughly 10% of target_chars, got {overlap}");
    }
  }

  #[test]
  fn test_reconstruct_text_round_trips() {
    let text = "The quick brown fox jumps over the lazy dog. ".repeat(80);
    let document_id = DocumentId::new();
    let chunks = chunk_text(document_id, &text, &config(200, 0.12));
    let reconstructed = fmcp_core::reconstruct_text(&chunks);
    assert_eq!(reconstructed, text);
  }

  #[test]
  fn test_reconstruct_text_round_trips_with_multibyte_chars() {
    let text = "héllo wörld 日本語のテキスト ".repeat(40);
    let document_id = DocumentId::new();
    let chunks = chunk_text(document_id, &text, &config(50, 0.1));
    let reconstructed = fmcp_core::reconstruct_text(&chunks);
    assert_eq!(reconstructed, text);
  }

  #[test]
  fn test_zero_overlap_fraction_has_no_overlap() {
    let text = "a".repeat(300);
    let chunks = chunk_text(DocumentId::new(), &text, &config(100, 0.0));
    for pair in chunks.windows(2) {
      assert_eq!(pair[0].end_byte, pair[1].start_byte);
    }
  }
}
