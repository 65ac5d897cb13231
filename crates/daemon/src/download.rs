//! Download URL signing and resolution (C12, §4.9, §6 "GET /download").
//!
//! Wraps [`fmcp_core::token::DownloadTokenIssuer`] with the daemon-side half
//! of §7's contract: the issuer only proves a token is unexpired and
//! untampered, so the server must additionally reject a token whose resolved
//! path escapes the folder root before it ever touches the filesystem.

use std::path::{Path, PathBuf};

use fmcp_core::token::{DownloadTarget, DownloadTokenIssuer};

use crate::error::DaemonError;

pub struct DownloadUrlSigner {
  issuer: DownloadTokenIssuer,
  ttl_secs: i64,
}

impl DownloadUrlSigner {
  pub fn new(issuer: DownloadTokenIssuer, ttl_secs: i64) -> Self {
    Self { issuer, ttl_secs }
  }

  /// Sign `(folder_path, relative_file)` into a `/download?token=...` URL.
  pub fn sign(&self, folder_path: &str, relative_file: &str) -> String {
    let token = self.issuer.issue(folder_path, relative_file, self.ttl_secs);
    format!("/download?token={token}")
  }

  /// Decode and verify a token's signature/expiry. The returned target's
  /// `folder` field names the folder the token was issued for; the caller
  /// still must confirm that folder is one the daemon actually has open
  /// before resolving against it.
  pub fn validate(&self, token: &str) -> Result<DownloadTarget, DaemonError> {
    Ok(self.issuer.validate(token)?)
  }

  /// Resolve an already-validated target to an absolute path under
  /// `folder_root`, rejecting any resolution that escapes it (§7, §8: a
  /// token for `file = "../../etc/passwd"` must fail with 403).
  pub fn resolve(&self, target: &DownloadTarget, folder_root: &Path) -> Result<PathBuf, DaemonError> {
    let root = folder_root.canonicalize().map_err(|e| DaemonError::Internal(e.to_string()))?;
    let candidate = root.join(&target.file);
    let resolved = candidate.canonicalize().map_err(|_| DaemonError::PathEscape)?;

    if !resolved.starts_with(&root) {
      return Err(DaemonError::PathEscape);
    }

    Ok(resolved)
  }
}
