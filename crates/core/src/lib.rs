pub mod config;
pub mod document;
pub mod error;
pub mod folder;
pub mod keyphrase;
pub mod model;
pub mod pagination;
pub mod token;
pub mod validation;

pub use config::{
  ChunkingConfig, Config, DaemonNetConfig, DownloadConfig, EmbeddingConfig, EmbeddingProvider, LoggingConfig,
  SchedulerConfig,
};
pub use document::{Chunk, ChunkEmbedding, Document, DocumentEmbedding, DocumentId, reconstruct_text};
pub use error::{Error, Result};
pub use folder::{FolderConfig, FolderId, FolderRuntimeState, LifecycleState};
pub use keyphrase::{KeyPhrase, select_diverse};
pub use model::{ModelDescriptor, ModelKind};
pub use pagination::{CURRENT_TOKEN_VERSION, OffsetCursor, PaginationError, decode, encode};
pub use token::{DownloadTarget, DownloadTokenIssuer, TokenError};
pub use validation::{
  ValidationError, ValidationResult, optional_array, optional_bool, optional_enum, optional_f64, optional_f64_range,
  optional_i64, optional_i64_range, optional_string, optional_string_array, optional_string_min, optional_u64,
  require_array, require_bool, require_enum, require_f64, require_f64_range, require_i64, require_i64_range,
  require_string, require_string_array, require_string_min, require_string_range, require_u64,
};
