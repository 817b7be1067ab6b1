pub mod bench;
pub mod cache;
pub mod change;
pub mod chunker;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod db_discovery;
pub mod embed;
pub mod error;
pub mod file;
pub mod fts;
pub mod index;
pub mod mcp;
pub mod output;
pub mod parser;
pub mod reconciler;
pub mod rerank;
pub mod search;
pub mod server;
pub mod state;
pub mod utils;
pub mod vectordb;
pub mod watch;

// Re-export commonly used types
pub use chunker::{Chunk, ChunkKind, Chunker};
pub use embed::{CacheStats, EmbeddedChunk, EmbeddingService, ModelType};
pub use error::{CodeSearchError, Result as CsResult};
pub use file::{FileInfo, FileWalker, Language, WalkStats};
pub use fts::{FtsResult, FtsStore};
pub use reconciler::{PipelineResult, Reconciler};
pub use utils::{
    group_chunks_by_path, group_chunks_by_path_with_capacity, group_embedded_chunks_by_path,
};
pub use vectordb::{SearchResult, StoreStats, VectorStore, VectorStoreAdapter};
