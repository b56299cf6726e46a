//! Memoization of gateway completions.
//!
//! Completions are keyed by a SHA-256 content hash of the prompt, system
//! prompt, offered schemas and model. Entries live in memory and, when a
//! directory is configured, as one JSON file per key so that replays survive
//! restarts.
//!
//! Two concurrent misses on the same key both reach the provider; the later
//! write replaces the earlier one. Nothing else is shared between keys.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::client::ToolDefinition;
use super::gateway::{Completion, Model};

/// Hash of cached content for efficient lookup and comparison.
///
/// The hash is computed using SHA-256 and stored as a hex-encoded string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hex-encoded SHA-256 of `content`.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash of a completion request's identity.
    pub fn for_completion(
        prompt: &str,
        system: &str,
        schemas: &[ToolDefinition],
        model: Model,
        require_call: bool,
    ) -> Self {
        let identity = serde_json::json!({
            "prompt": prompt,
            "system": system,
            "schemas": schemas,
            "model": model.as_str(),
            "require_call": require_call,
        });
        Self::from_content(&identity.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate between 0.0 and 1.0, or 0.0 if there were no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Completion cache shared by every worker of a run.
pub struct ResponseCache {
    entries: RwLock<HashMap<ContentHash, Completion>>,
    dir: Option<PathBuf>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Shared handle to a response cache.
pub type SharedResponseCache = Arc<ResponseCache>;

impl ResponseCache {
    /// Cache kept in memory only.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dir: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache backed by one JSON file per key under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: Some(dir),
            ..Self::in_memory()
        })
    }

    /// Look up a completion, falling back to disk on a memory miss.
    pub fn get(&self, key: &ContentHash) -> Option<Completion> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .or_else(|| {
                let loaded = self.load_from_disk(key)?;
                self.entries
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.clone(), loaded.clone());
                Some(loaded)
            });

        match found {
            Some(completion) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup(true);
                Some(completion)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache_lookup(false);
                None
            }
        }
    }

    /// Store a completion. Disk failures are logged and otherwise ignored.
    pub fn put(&self, key: ContentHash, completion: Completion) {
        if let Some(dir) = &self.dir {
            if let Err(err) = write_entry(dir, &key, &completion) {
                tracing::warn!(key = %key, error = %err, "Failed to persist cached completion");
            }
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, completion);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    fn load_from_disk(&self, key: &ContentHash) -> Option<Completion> {
        let path = entry_path(self.dir.as_deref()?, key);
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(completion) => Some(completion),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Ignoring corrupt cache entry");
                None
            }
        }
    }
}

fn entry_path(dir: &Path, key: &ContentHash) -> PathBuf {
    dir.join(format!("{}.json", key.as_str()))
}

fn write_entry(dir: &Path, key: &ContentHash, completion: &Completion) -> std::io::Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(serde_json::to_string(completion)?.as_bytes())?;
    file.persist(entry_path(dir, key))
        .map_err(|e| e.error)?;
    Ok(())
}
