//! Extension-to-extractor dispatch (C2).

use std::collections::HashMap;
use std::sync::Arc;

use crate::{ExtractError, ExtractedDocument, FormatExtractor, Result};

/// Extensions (lowercase, no dot) that some registered extractor handles.
/// `index`'s scanner (C6 Plan stage) uses this to decide which files are
/// "supported documents" in the first place.
pub fn supported_extension(ext: &str) -> bool {
  matches!(
    ext.to_ascii_lowercase().as_str(),
    "txt" | "md" | "markdown" | "rst" | "pdf" | "docx" | "xlsx" | "xlsm"
  )
}

/// Dispatches a file to the extractor registered for its extension.
pub struct ExtractorRegistry {
  by_extension: HashMap<&'static str, Arc<dyn FormatExtractor>>,
}

impl ExtractorRegistry {
  pub fn with_defaults() -> Self {
    let mut registry = Self { by_extension: HashMap::new() };
    registry.register(Arc::new(crate::plaintext::PlaintextExtractor));
    registry.register(Arc::new(crate::pdf::PdfExtractor));
    registry.register(Arc::new(crate::docx::DocxExtractor));
    registry.register(Arc::new(crate::xlsx::XlsxExtractor));
    registry
  }

  pub fn register(&mut self, extractor: Arc<dyn FormatExtractor>) {
    for ext in extractor.extensions() {
      self.by_extension.insert(ext, extractor.clone());
    }
  }

  pub fn extract(&self, path: &str, bytes: &[u8]) -> Result<ExtractedDocument> {
    let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    let extractor = self
      .by_extension
      .get(ext.as_str())
      .ok_or_else(|| ExtractError::UnsupportedExtension(ext.clone()))?;
    extractor.extract(path, bytes)
  }

  pub fn mime_type_for(&self, path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    self.by_extension.get(ext.as_str()).map(|e| e.mime_type())
  }
}

impl Default for ExtractorRegistry {
  fn default() -> Self {
    Self::with_defaults()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_supported_extension() {
    assert!(supported_extension("md"));
    assert!(supported_extension("PDF"));
    assert!(!supported_extension("exe"));
  }

  #[test]
  fn test_dispatch_by_extension() {
    let registry = ExtractorRegistry::with_defaults();
    let doc = registry.extract("notes.txt", b"hello world").unwrap();
    assert_eq!(doc.text, "hello world");
  }

  #[test]
  fn test_unsupported_extension_errors() {
    let registry = ExtractorRegistry::with_defaults();
    let err = registry.extract("archive.zip", b"PK").unwrap_err();
    assert!(matches!(err, ExtractError::UnsupportedExtension(_)));
  }
}
