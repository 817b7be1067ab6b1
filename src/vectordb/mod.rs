pub mod adapter;
pub mod store;

pub use adapter::{ChunkType, Point, PointPayload, ScrollFilter, ScrollPage, VectorStoreAdapter};
pub use store::{ChunkMetadata, SearchResult, StoreStats, VectorStore};
