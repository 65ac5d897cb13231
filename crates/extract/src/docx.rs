//! DOCX extraction: paragraph text is kept, styling and embedded objects are
//! dropped (§4.8: surfaced to clients as an extraction warning).

use docx_rs::read_docx;

use crate::{ExtractError, ExtractedDocument, FormatExtractor, Result};

pub struct DocxExtractor;

impl FormatExtractor for DocxExtractor {
  fn extensions(&self) -> &'static [&'static str] {
    &["docx"]
  }

  fn mime_type(&self) -> &'static str {
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
  }

  fn extract(&self, _path: &str, bytes: &[u8]) -> Result<ExtractedDocument> {
    let docx = read_docx(bytes).map_err(|e| ExtractError::Malformed { format: "docx", message: e.to_string() })?;

    let mut outline = Vec::new();
    let mut paragraphs = Vec::new();

    for child in &docx.document.children {
      if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
        let text = paragraph_text(paragraph);
        if text.trim().is_empty() {
          continue;
        }
        if is_heading(paragraph) {
          outline.push(text.clone());
        }
        paragraphs.push(text);
      }
    }

    Ok(ExtractedDocument {
      text: paragraphs.join("\n\n"),
      metadata: serde_json::json!({}),
      outline,
      warnings: vec!["styling, tables, and embedded objects are not represented in extracted text".to_string()],
    })
  }
}

fn paragraph_text(paragraph: &docx_rs::Paragraph) -> String {
  paragraph
    .children
    .iter()
    .filter_map(|child| match child {
      docx_rs::ParagraphChild::Run(run) => Some(run_text(run)),
      _ => None,
    })
    .collect::<Vec<_>>()
    .join("")
}

fn run_text(run: &docx_rs::Run) -> String {
  run
    .children
    .iter()
    .filter_map(|child| match child {
      docx_rs::RunChild::Text(text) => Some(text.text.clone()),
      _ => None,
    })
    .collect::<Vec<_>>()
    .join("")
}

fn is_heading(paragraph: &docx_rs::Paragraph) -> bool {
  paragraph
    .property
    .style
    .as_ref()
    .map(|style| style.val.to_ascii_lowercase().starts_with("heading"))
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_malformed_docx_errors() {
    let err = DocxExtractor.extract("a.docx", b"not a docx").unwrap_err();
    assert!(matches!(err, ExtractError::Malformed { format: "docx", .. }));
  }
}
