//! Cache for decoded message payloads.

mod chunk_cache;

pub use chunk_cache::{hash_path, CacheStats, ChunkCache, ChunkKey};
