//! Format extraction (C2, §3).
//!
//! A pure function `(path, bytes) -> (plain text, format metadata, outline)`.
//! External collaborator: the decision of *which* extractor to run for a
//! path, and what to do when extraction fails, belongs to C6 (the `index`
//! crate's pipeline); this crate only knows how to turn bytes into text.

pub mod docx;
pub mod pdf;
pub mod plaintext;
pub mod registry;
pub mod xlsx;

pub use registry::{ExtractorRegistry, supported_extension};

use thiserror::Error;

/// Output of running one format extractor over a file's bytes.
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
  pub text: String,
  /// Opaque per-format metadata (page count, sheet names, ...), stored
  /// verbatim in `Document::extraction_metadata`.
  pub metadata: serde_json::Value,
  /// Section/heading outline, when the format carries one.
  pub outline: Vec<String>,
  /// Human-readable notes about content this extractor cannot represent
  /// (e.g. "tables flattened", "images dropped") — surfaced to clients via
  /// C11's `extraction-warnings`.
  pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("unsupported extension: {0}")]
  UnsupportedExtension(String),
  #[error("malformed {format} document: {message}")]
  Malformed { format: &'static str, message: String },
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// A pure `(path, bytes) -> ExtractedDocument` transform for one file format.
pub trait FormatExtractor: Send + Sync {
  /// File extensions (lowercase, no dot) this extractor handles.
  fn extensions(&self) -> &'static [&'static str];

  fn mime_type(&self) -> &'static str;

  fn extract(&self, path: &str, bytes: &[u8]) -> Result<ExtractedDocument>;
}
