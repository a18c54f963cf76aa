//! Caching layer for question embeddings.

pub mod sqlite;

pub use sqlite::{CacheStats, SqliteEmbeddingCache};
