//! Content-addressed summarization cache.
//!
//! One record per cache location, holding the fingerprint of the document
//! it was computed from and the full [`SummarySet`]:
//!
//! ```json
//! { "fingerprint": "<sha256 hex>", "summaries": { "text": [], "tables": [], "images": [] } }
//! ```
//!
//! The cache itself never compares fingerprints; [`load`](SummaryCache::load)
//! returns whatever is stored and the orchestrator decides whether the record
//! is reusable. Any mismatch invalidates the whole record.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::models::SummarySet;

/// A stored cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub summaries: SummarySet,
}

/// Durable storage for a single [`CacheEntry`].
///
/// `save` replaces the record in full: a subsequent `load` sees either the
/// previous record or the new one, never a mix.
pub trait SummaryCache: Send + Sync {
    /// Return the stored record, if any.
    fn load(&self) -> Result<Option<CacheEntry>>;

    /// Replace the stored record.
    fn save(&self, fingerprint: &str, summaries: &SummarySet) -> Result<()>;

    /// Remove the stored record. A no-op when nothing is stored.
    fn invalidate(&self) -> Result<()>;
}

/// SHA-256 of the document bytes, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fingerprint a document on disk.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    Ok(fingerprint(&bytes))
}

/// JSON-file cache. Writes go to a sibling temp file which is then renamed
/// over the record.
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SummaryCache for FileCache {
    fn load(&self) -> Result<Option<CacheEntry>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read cache: {}", self.path.display()))?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).with_context(|| {
            format!(
                "Cache record is corrupt: {} (run `mrag cache clear`)",
                self.path.display()
            )
        })?;
        Ok(Some(entry))
    }

    fn save(&self, fingerprint: &str, summaries: &SummarySet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cache directory: {}", parent.display())
            })?;
        }

        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            summaries: summaries.clone(),
        };
        let json = serde_json::to_vec_pretty(&entry)?;

        let tmp = self.temp_path();
        {
            let mut file = std::fs::File::create(&tmp)
                .with_context(|| format!("Failed to write cache: {}", tmp.display()))?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace cache: {}", self.path.display()))?;
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove cache: {}", self.path.display())),
        }
    }
}

/// In-process cache for tests and one-shot runs.
#[derive(Default)]
pub struct InMemoryCache {
    entry: RwLock<Option<CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SummaryCache for InMemoryCache {
    fn load(&self) -> Result<Option<CacheEntry>> {
        Ok(self
            .entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, fingerprint: &str, summaries: &SummarySet) -> Result<()> {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = Some(CacheEntry {
            fingerprint: fingerprint.to_string(),
            summaries: summaries.clone(),
        });
        Ok(())
    }

    fn invalidate(&self) -> Result<()> {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
