//! SQLite cache of embeddings keyed by (model, question text).

use crate::error::{EmbeddingError, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// File name of the default cache database
const DEFAULT_FILE_NAME: &str = "embeddings.db";

/// SQLite cache for embedding vectors.
#[derive(Debug)]
pub struct SqliteEmbeddingCache {
    conn: Mutex<Connection>,
}

impl SqliteEmbeddingCache {
    /// Open (or create) a cache database.
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.initialize_schema()?;
        Ok(cache)
    }

    /// Create an in-memory cache (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Mutex::new(conn),
        };
        cache.initialize_schema()?;
        Ok(cache)
    }

    /// Open the cache at [`Self::default_path`], creating the directory if needed.
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path()
            .ok_or_else(|| EmbeddingError::Cache("no platform cache directory".to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EmbeddingError::Cache(format!("cannot create {}: {e}", parent.display())))?;
        }
        Self::new(path)
    }

    /// `<platform cache dir>/debias/embeddings.db`
    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("debias").join(DEFAULT_FILE_NAME))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EmbeddingError::Cache("cache connection lock poisoned".to_string()))
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS embeddings (
                model TEXT NOT NULL,
                text TEXT NOT NULL,
                vector TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                cached_at TEXT NOT NULL,
                PRIMARY KEY (model, text)
            )",
            [],
        )?;
        Ok(())
    }

    /// Get the cached vector for `text` under `model`.
    pub fn get(&self, model: &str, text: &str) -> Result<Option<Vec<f64>>> {
        let conn = self.lock()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT vector FROM embeddings WHERE model = ?1 AND text = ?2",
                params![model, text],
                |row| row.get(0),
            )
            .optional()?;

        stored
            .map(|json| serde_json::from_str(&json).map_err(EmbeddingError::from))
            .transpose()
    }

    /// Store the vector for `text` under `model`, replacing any previous entry.
    pub fn put(&self, model: &str, text: &str, vector: &[f64]) -> Result<()> {
        let json = serde_json::to_string(vector)?;
        let cached_at = Utc::now().to_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (model, text, vector, dimension, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![model, text, json, vector.len() as i64, cached_at],
        )?;
        Ok(())
    }

    /// Remove every entry for `model`.
    pub fn clear_model(&self, model: &str) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM embeddings WHERE model = ?1", params![model])?)
    }

    /// Clear all cached embeddings.
    pub fn clear_all(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM embeddings", [])?;
        Ok(())
    }

    /// Get cache statistics.
    pub fn get_stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;
        let entries: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        let models: i64 =
            conn.query_row("SELECT COUNT(DISTINCT model) FROM embeddings", [], |row| {
                row.get(0)
            })?;

        Ok(CacheStats {
            entries: entries as usize,
            models: models as usize,
        })
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached vectors
    pub entries: usize,
    /// Number of distinct embedding models
    pub models: usize,
}
