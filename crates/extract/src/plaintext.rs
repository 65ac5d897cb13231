//! Plain-text and Markdown extraction: the bytes already are the text.

use crate::{ExtractedDocument, FormatExtractor, Result};

pub struct PlaintextExtractor;

impl FormatExtractor for PlaintextExtractor {
  fn extensions(&self) -> &'static [&'static str] {
    &["txt", "md", "markdown", "rst"]
  }

  fn mime_type(&self) -> &'static str {
    "text/plain"
  }

  fn extract(&self, _path: &str, bytes: &[u8]) -> Result<ExtractedDocument> {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let outline = text
      .lines()
      .filter(|line| line.starts_with('#'))
      .map(|line| line.trim_start_matches('#').trim().to_string())
      .filter(|line| !line.is_empty())
      .collect();

    Ok(ExtractedDocument { text, metadata: serde_json::json!({}), outline, warnings: Vec::new() })
  }
}
