use thiserror::Error;

/// Closed error type for the core data model and configuration layer.
///
/// Downstream crates (db, index, daemon, ...) define their own error enums
/// for their own failure modes and wrap this one with `#[from]` where a
/// core operation is the cause.
#[derive(Error, Debug)]
pub enum Error {
  #[error("not found: {entity} {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("validation: {0}")]
  Validation(String),

  #[error("config: {0}")]
  Config(String),

  #[error("invalid continuation token: {0}")]
  InvalidToken(String),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("toml parse: {0}")]
  TomlParse(#[from] toml::de::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
