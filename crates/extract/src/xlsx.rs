//! XLSX extraction: cell values are flattened to tab-separated text per row;
//! formulas are replaced by their last-computed value (§4.8: surfaced to
//! clients as an extraction warning).

use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};

use crate::{ExtractError, ExtractedDocument, FormatExtractor, Result};

pub struct XlsxExtractor;

impl FormatExtractor for XlsxExtractor {
  fn extensions(&self) -> &'static [&'static str] {
    &["xlsx", "xlsm"]
  }

  fn mime_type(&self) -> &'static str {
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
  }

  fn extract(&self, _path: &str, bytes: &[u8]) -> Result<ExtractedDocument> {
    let mut workbook: Xlsx<_> = calamine::open_workbook_from_rs(Cursor::new(bytes))
      .map_err(|e| ExtractError::Malformed { format: "xlsx", message: e.to_string() })?;

    let sheet_names = workbook.sheet_names().to_vec();
    let mut sections = Vec::with_capacity(sheet_names.len());

    for name in &sheet_names {
      let Ok(range) = workbook.worksheet_range(name) else { continue };
      let mut rows = Vec::new();
      for row in range.rows() {
        let cells: Vec<String> = row.iter().map(cell_to_string).collect();
        rows.push(cells.join("\t"));
      }
      sections.push(format!("# {name}\n{}", rows.join("\n")));
    }

    Ok(ExtractedDocument {
      text: sections.join("\n\n"),
      metadata: serde_json::json!({ "sheets": sheet_names }),
      outline: sheet_names,
      warnings: vec!["formulas are flattened to their last computed value".to_string()],
    })
  }
}

fn cell_to_string(data: &Data) -> String {
  match data {
    Data::Empty => String::new(),
    Data::String(s) => s.clone(),
    Data::Float(f) => f.to_string(),
    Data::Int(i) => i.to_string(),
    Data::Bool(b) => b.to_string(),
    Data::Error(e) => format!("#ERROR:{e:?}"),
    Data::DateTime(d) => d.to_string(),
    Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
  }
}
