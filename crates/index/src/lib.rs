pub mod debounce;
pub mod doc_chunker;
pub mod embedder;
pub mod gitignore;
pub mod pipeline;
pub mod scanner;
pub mod watcher;

pub use debounce::{BatchProcessor, DebounceConfig, DebouncedWatcher};
pub use doc_chunker::chunk_text;
pub use embedder::BatchEmbedder;
pub use gitignore::{GitignoreState, compute_gitignore_hash, should_ignore};
pub use pipeline::{IndexingPipeline, PipelineError, PipelineOutcome};
pub use scanner::{METADATA_DIR_NAME, ScanError, ScanProgress, ScanResult, ScannedFile, Scanner, build_walker};
pub use watcher::{ChangeKind, FileChange, FileWatcher, WatchError};
