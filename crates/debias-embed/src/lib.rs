#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/debias/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod cached;
pub mod error;
pub mod openai;
pub mod provider;

pub use cache::{CacheStats, SqliteEmbeddingCache};
pub use cached::CachedProvider;
pub use error::{EmbeddingError, Result};
pub use openai::OpenAiEmbeddings;
pub use provider::{EmbeddingProvider, RetryConfig, RetryingProvider, StaticProvider};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
