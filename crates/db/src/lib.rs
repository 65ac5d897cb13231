pub mod chunks;
pub mod connection;
pub mod documents;
pub mod index_checkpoints;
pub mod schema;
pub mod search;

pub use connection::{DbError, FolderDb, Result, default_data_dir};
pub use index_checkpoints::IndexCheckpoint;
pub use schema::{DEFAULT_VECTOR_DIM, chunks_schema, documents_schema, index_checkpoints_schema};
pub use search::ScoredChunk;
