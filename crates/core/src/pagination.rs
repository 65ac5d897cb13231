//! Opaque continuation tokens for paginated query-service operations (§4.8, §9).
//!
//! Tokens are base64url-encoded JSON carrying the minimum state needed to
//! resume a listing plus a `v` version field, so a future server version can
//! reject or upgrade stale tokens instead of guessing their shape.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

pub const CURRENT_TOKEN_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PaginationError {
  #[error("continuation token is not valid base64url: {0}")]
  Encoding(String),
  #[error("continuation token is not valid JSON: {0}")]
  Json(String),
  #[error("continuation token version {found} is not supported (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },
}

/// Wraps arbitrary per-operation cursor state `T` with a version tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
  v: u32,
  state: T,
}

/// Encode a cursor `state` into an opaque continuation token.
pub fn encode<T: Serialize>(state: &T) -> String {
  let envelope = Envelope {
    v: CURRENT_TOKEN_VERSION,
    state,
  };
  let json = serde_json::to_vec(&envelope).expect("cursor state is always serializable");
  URL_SAFE_NO_PAD.encode(json)
}

/// Decode and structurally validate a continuation token, rejecting
/// tampered or version-mismatched tokens.
pub fn decode<T: DeserializeOwned>(token: &str) -> Result<T, PaginationError> {
  let bytes = URL_SAFE_NO_PAD
    .decode(token)
    .map_err(|e| PaginationError::Encoding(e.to_string()))?;

  #[derive(Deserialize)]
  struct RawEnvelope {
    v: u32,
  }
  let raw: RawEnvelope = serde_json::from_slice(&bytes).map_err(|e| PaginationError::Json(e.to_string()))?;
  if raw.v != CURRENT_TOKEN_VERSION {
    return Err(PaginationError::UnsupportedVersion {
      found: raw.v,
      expected: CURRENT_TOKEN_VERSION,
    });
  }

  let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(|e| PaginationError::Json(e.to_string()))?;
  Ok(envelope.state)
}

/// Cursor state for an offset-based listing (`explore`, `list-documents`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OffsetCursor {
  pub offset: usize,
  pub scope: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_roundtrip() {
    let cursor = OffsetCursor {
      offset: 40,
      scope: "/docs".into(),
    };
    let token = encode(&cursor);
    let decoded: OffsetCursor = decode(&token).unwrap();
    assert_eq!(decoded, cursor);
  }

  #[test]
  fn test_rejects_tampered_token() {
    let cursor = OffsetCursor {
      offset: 0,
      scope: "/".into(),
    };
    let mut token = encode(&cursor);
    token.push_str("garbage");
    let result: Result<OffsetCursor, _> = decode(&token);
    assert!(result.is_err());
  }

  #[test]
  fn test_rejects_future_version() {
    let envelope = Envelope {
      v: CURRENT_TOKEN_VERSION + 1,
      state: OffsetCursor {
        offset: 0,
        scope: "/".into(),
      },
    };
    let json = serde_json::to_vec(&envelope).unwrap();
    let token = URL_SAFE_NO_PAD.encode(json);
    let result: Result<OffsetCursor, _> = decode(&token);
    assert!(matches!(result, Err(PaginationError::UnsupportedVersion { .. })));
  }
}
