//! Embedding cache location for the CLI.
//!
//! Uses the platform cache directory unless `--cache-path` overrides it:
//! - Linux: `~/.cache/debias/`
//! - macOS: `~/Library/Caches/debias/`
//! - Windows: `%LOCALAPPDATA%\debias\`

use debias::embed::{EmbeddingError, SqliteEmbeddingCache};
use std::path::{Path, PathBuf};

/// Resolve the cache database path.
pub(crate) fn cache_path(path: Option<&Path>) -> Option<PathBuf> {
    path.map(Path::to_path_buf).or_else(SqliteEmbeddingCache::default_path)
}

/// Open the cache at `path` (or the default), creating the directory if needed.
pub(crate) fn open_cache(path: Option<&Path>) -> Result<SqliteEmbeddingCache, EmbeddingError> {
    let Some(path) = path else {
        return SqliteEmbeddingCache::open_default();
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| EmbeddingError::Cache(format!("cannot create {}: {e}", parent.display())))?;
    }

    SqliteEmbeddingCache::new(path)
}

/// One-line description of the cache location and size.
pub(crate) fn cache_summary(cache: &SqliteEmbeddingCache, path: Option<&Path>) -> String {
    let location = cache_path(path).map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string());
    match cache.get_stats() {
        Ok(stats) => format!(
            "Embedding cache: {location} ({} entries, {} models)",
            stats.entries, stats.models
        ),
        Err(e) => format!("Embedding cache: {location} (stats unavailable: {e})"),
    }
}
