//! PDF extraction. Tables and embedded images are not represented in the
//! extracted text (§4.8: surfaced to clients as an extraction warning).

use crate::{ExtractError, ExtractedDocument, FormatExtractor, Result};

pub struct PdfExtractor;

impl FormatExtractor for PdfExtractor {
  fn extensions(&self) -> &'static [&'static str] {
    &["pdf"]
  }

  fn mime_type(&self) -> &'static str {
    "application/pdf"
  }

  fn extract(&self, _path: &str, bytes: &[u8]) -> Result<ExtractedDocument> {
    let text = pdf_extract::extract_text_from_mem(bytes)
      .map_err(|e| ExtractError::Malformed { format: "pdf", message: e.to_string() })?;

    Ok(ExtractedDocument {
      text,
      metadata: serde_json::json!({}),
      outline: Vec::new(),
      warnings: vec!["tables and images are not represented in extracted text".to_string()],
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_malformed_pdf_errors() {
    let err = PdfExtractor.extract("a.pdf", b"not a pdf").unwrap_err();
    assert!(matches!(err, ExtractError::Malformed { format: "pdf", .. }));
  }
}
