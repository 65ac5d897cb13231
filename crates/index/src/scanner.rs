use extract::supported_extension;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant, UNIX_EPOCH};
use thiserror::Error;

/// The store's own metadata subdirectory (§4.5): never scanned or watched.
pub const METADATA_DIR_NAME: &str = ".folder-mcp";

#[derive(Error, Debug)]
pub enum ScanError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Walk error: {0}")]
  Walk(#[from] ignore::Error),
}

/// Result of scanning a single file (C6 Plan stage input).
#[derive(Debug, Clone)]
pub struct ScannedFile {
  pub path: PathBuf,
  pub relative_path: String,
  pub mime_type: &'static str,
  pub size: u64,
  pub mtime: u64,
  pub checksum: String,
}

/// Result of scanning a directory.
#[derive(Debug)]
pub struct ScanResult {
  pub files: Vec<ScannedFile>,
  pub skipped_count: u32,
  pub total_bytes: u64,
  pub scan_duration: Duration,
}

/// Progress callback data.
#[derive(Debug, Clone)]
pub struct ScanProgress {
  pub scanned: u32,
  pub path: PathBuf,
}

/// Builds the one ignore-matcher construction shared by the initial scan and
/// the steady-state watcher (§4.5: "share one ignore-matcher construction so
/// that C6's initial plan and C7's steady-state watch agree on what is
/// excluded").
pub fn build_walker(root: &Path, follow_links: bool) -> WalkBuilder {
  let mut builder = WalkBuilder::new(root);
  builder
    .follow_links(follow_links)
    .hidden(false)
    .git_ignore(true)
    .git_global(true)
    .git_exclude(true)
    .add_custom_ignore_filename(".folder-mcp-ignore")
    .filter_entry(|entry| entry.file_name() != METADATA_DIR_NAME);
  builder
}

/// File scanner: supported-extension documents under a folder, with
/// `.gitignore`/`.folder-mcp-ignore` respected and the store's own metadata
/// directory always excluded.
pub struct Scanner {
  max_file_size: u64,
  follow_links: bool,
}

impl Default for Scanner {
  fn default() -> Self {
    Self::new()
  }
}

impl Scanner {
  pub fn new() -> Self {
    Self { max_file_size: 50 * 1024 * 1024, follow_links: false }
  }

  pub fn with_max_file_size(mut self, size: u64) -> Self {
    self.max_file_size = size;
    self
  }

  /// Scan a folder in parallel, in stable lexicographic order by relative
  /// path (§4.4: "Files processed in stable lexicographic order").
  pub fn scan<F>(&self, root: &Path, progress: F) -> ScanResult
  where
    F: Fn(ScanProgress) + Send + Sync,
  {
    let start = Instant::now();
    let scanned = AtomicU32::new(0);
    let skipped = AtomicU32::new(0);
    let total_bytes = AtomicU64::new(0);

    let walker = build_walker(root, self.follow_links).build();

    let mut files: Vec<ScannedFile> = walker
      .filter_map(|e| e.ok())
      .par_bridge()
      .filter_map(|entry| {
        let path = entry.path();

        if entry.file_type().is_none_or(|ft| ft.is_dir()) {
          return None;
        }

        let count = scanned.fetch_add(1, Ordering::Relaxed);
        if count.is_multiple_of(100) {
          progress(ScanProgress { scanned: count, path: path.to_path_buf() });
        }

        let ext = path.extension()?.to_str()?;
        if !supported_extension(ext) {
          return None;
        }

        let metadata = entry.metadata().ok()?;
        if metadata.len() == 0 || metadata.len() > self.max_file_size {
          skipped.fetch_add(1, Ordering::Relaxed);
          return None;
        }

        let checksum = quick_checksum(path).ok()?;
        let mtime = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?.as_secs();
        total_bytes.fetch_add(metadata.len(), Ordering::Relaxed);

        Some(ScannedFile {
          path: path.to_path_buf(),
          relative_path: path.strip_prefix(root).ok()?.to_string_lossy().into(),
          mime_type: mime_type_for(ext),
          size: metadata.len(),
          mtime,
          checksum,
        })
      })
      .collect();

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    ScanResult {
      files,
      skipped_count: skipped.load(Ordering::Relaxed),
      total_bytes: total_bytes.load(Ordering::Relaxed),
      scan_duration: start.elapsed(),
    }
  }

  pub fn scan_file(&self, path: &Path, root: &Path) -> Option<ScannedFile> {
    let ext = path.extension()?.to_str()?;
    if !supported_extension(ext) {
      return None;
    }

    let metadata = path.metadata().ok()?;
    if metadata.len() == 0 || metadata.len() > self.max_file_size {
      return None;
    }

    let checksum = quick_checksum(path).ok()?;
    let mtime = metadata.modified().ok()?.duration_since(UNIX_EPOCH).ok()?.as_secs();

    Some(ScannedFile {
      path: path.to_path_buf(),
      relative_path: path.strip_prefix(root).ok()?.to_string_lossy().into(),
      mime_type: mime_type_for(ext),
      size: metadata.len(),
      mtime,
      checksum,
    })
  }
}

fn mime_type_for(ext: &str) -> &'static str {
  match ext.to_ascii_lowercase().as_str() {
    "md" | "markdown" => "text/markdown",
    "rst" => "text/x-rst",
    "pdf" => "application/pdf",
    "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "xlsx" | "xlsm" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    _ => "text/plain",
  }
}

/// Quick checksum using first 4KB + file size.
fn quick_checksum(path: &Path) -> Result<String, std::io::Error> {
  let mut file = File::open(path)?;
  let mut buffer = [0u8; 4096];
  let n = file.read(&mut buffer)?;

  let mut hasher = DefaultHasher::new();
  buffer[..n].hash(&mut hasher);
  file.metadata()?.len().hash(&mut hasher);

  Ok(format!("{:016x}", hasher.finish()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_scan_basic() {
    let dir = TempDir::new().unwrap();

    std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
    std::fs::write(dir.path().join("test.txt"), "hello").unwrap();

    let scanner = Scanner::new();
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].relative_path, "test.txt");
  }

  #[test]
  fn test_scan_respects_gitignore() {
    let dir = TempDir::new().unwrap();

    std::fs::create_dir(dir.path().join(".git")).unwrap();
    std::fs::write(dir.path().join(".gitignore"), "ignored/\n*.log").unwrap();

    std::fs::write(dir.path().join("notes.md"), "# hi").unwrap();
    std::fs::create_dir(dir.path().join("ignored")).unwrap();
    std::fs::write(dir.path().join("ignored/hidden.md"), "# hidden").unwrap();
    std::fs::write(dir.path().join("debug.log"), "log").unwrap();

    let scanner = Scanner::new();
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].relative_path, "notes.md");
  }

  #[test]
  fn test_scan_excludes_metadata_dir() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("notes.md"), "# hi").unwrap();
    std::fs::create_dir(dir.path().join(METADATA_DIR_NAME)).unwrap();
    std::fs::write(dir.path().join(METADATA_DIR_NAME).join("db.md"), "# internal").unwrap();

    let scanner = Scanner::new();
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].relative_path, "notes.md");
  }

  #[test]
  fn test_scan_skips_large_files() {
    let dir = TempDir::new().unwrap();

    std::fs::write(dir.path().join("small.md"), "# small").unwrap();
    let large_content = "x".repeat(2 * 1024 * 1024);
    std::fs::write(dir.path().join("large.md"), large_content).unwrap();

    let scanner = Scanner::new().with_max_file_size(1024 * 1024);
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].relative_path, "small.md");
    assert_eq!(result.skipped_count, 1);
  }

  #[test]
  fn test_scan_skips_empty_files() {
    let dir = TempDir::new().unwrap();

    std::fs::write(dir.path().join("normal.md"), "# normal").unwrap();
    std::fs::write(dir.path().join("empty.md"), "").unwrap();

    let scanner = Scanner::new();
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].relative_path, "normal.md");
    assert_eq!(result.skipped_count, 1);
  }

  #[test]
  fn test_quick_checksum() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.md");
    std::fs::write(&path, "# test").unwrap();

    let checksum1 = quick_checksum(&path).unwrap();
    let checksum2 = quick_checksum(&path).unwrap();

    assert_eq!(checksum1, checksum2);
    assert_eq!(checksum1.len(), 16);
  }
}
