//! Download token issuance and validation (§3, §4.9, C12).
//!
//! The per-daemon HMAC secret is generated at startup, held in memory, and
//! never persisted (§5). A token is a base64url-encoded JSON payload plus a
//! hex-encoded HMAC-SHA256 tag over the payload bytes.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum TokenError {
  #[error("token expired")]
  Expired,
  #[error("token signature invalid")]
  BadSignature,
  #[error("token malformed: {0}")]
  Malformed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DownloadTokenPayload {
  folder: String,
  file: String,
  expiry: DateTime<Utc>,
}

/// The decoded, validated identity a download token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
  pub folder: String,
  pub file: String,
}

/// Signs and validates download tokens for one daemon's lifetime.
pub struct DownloadTokenIssuer {
  secret: Vec<u8>,
}

impl DownloadTokenIssuer {
  /// Default expiry ceiling: tokens may not outlive 15 minutes (§3).
  pub const MAX_TTL_SECS: i64 = 15 * 60;

  pub fn new(secret: Vec<u8>) -> Self {
    Self { secret }
  }

  /// Generate a fresh random secret. Intended for daemon startup.
  pub fn generate() -> Self {
    use rand::RngCore;
    let mut secret = vec![0u8; 32];
    rand::rng().fill_bytes(&mut secret);
    Self::new(secret)
  }

  /// Issue a token for `(folder, file)`, expiring `ttl_secs` from now
  /// (clamped to `MAX_TTL_SECS`).
  pub fn issue(&self, folder: &str, file: &str, ttl_secs: i64) -> String {
    let ttl = ttl_secs.clamp(1, Self::MAX_TTL_SECS);
    let payload = DownloadTokenPayload {
      folder: folder.to_string(),
      file: file.to_string(),
      expiry: Utc::now() + chrono::Duration::seconds(ttl),
    };
    self.encode(&payload)
  }

  fn encode(&self, payload: &DownloadTokenPayload) -> String {
    let json = serde_json::to_vec(payload).expect("DownloadTokenPayload is always serializable");
    let body = URL_SAFE_NO_PAD.encode(&json);

    let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    let tag = hex::encode(mac.finalize().into_bytes());

    format!("{body}.{tag}")
  }

  /// Validate a token string, returning the resolved (folder, file) or a
  /// typed error. Rejects malformed tokens, bad signatures, and expired
  /// tokens. Path-escape checking (§7) is the caller's responsibility once
  /// the file path is resolved against the folder root.
  pub fn validate(&self, token: &str) -> Result<DownloadTarget, TokenError> {
    let (body, tag) = token
      .split_once('.')
      .ok_or_else(|| TokenError::Malformed("missing signature separator".into()))?;

    let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    let expected_tag = hex::encode(mac.finalize().into_bytes());
    if !constant_time_eq(expected_tag.as_bytes(), tag.as_bytes()) {
      return Err(TokenError::BadSignature);
    }

    let json = URL_SAFE_NO_PAD
      .decode(body)
      .map_err(|e| TokenError::Malformed(e.to_string()))?;
    let payload: DownloadTokenPayload =
      serde_json::from_slice(&json).map_err(|e| TokenError::Malformed(e.to_string()))?;

    if payload.expiry < Utc::now() {
      return Err(TokenError::Expired);
    }

    Ok(DownloadTarget {
      folder: payload.folder,
      file: payload.file,
    })
  }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
  if a.len() != b.len() {
    return false;
  }
  a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
