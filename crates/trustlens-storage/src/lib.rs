//! Storage layer for Trustlens: page-text cache + processing ledger.
//!
//! - [`PageCache`]: extracted page text keyed by source-file content hash,
//!   with TTL semantics (an expired entry behaves exactly like an absent
//!   one). Saves the expensive OCR/extraction step on re-runs.
//! - [`ProcessingLedger`]: append-only record of processing runs. The
//!   pipeline only ever appends; reads exist for history listings.
//!
//! Cache misses and IO failures degrade to "absent" — a broken cache never
//! fails a processing run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use trustlens_ingest::PageText;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ============================================================================
// Page-text cache
// ============================================================================

/// A cached extraction: full text plus page breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedExtraction {
    pub source_path: String,
    pub full_text: String,
    pub pages: Vec<PageText>,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheIndexEntry {
    file_size: u64,
    page_count: usize,
    total_chars: usize,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheIndex {
    entries: std::collections::BTreeMap<String, CacheIndexEntry>,
}

/// Content-hash-keyed cache of extracted page text.
///
/// The key is the sha256 of the source file's bytes, so a modified file
/// never hits a stale entry; the index also records file size for a cheap
/// staleness cross-check.
pub struct PageCache {
    dir: PathBuf,
    ttl: Option<Duration>,
    index: RwLock<CacheIndex>,
}

impl PageCache {
    /// Open (or create) a cache directory. No TTL: entries live until
    /// cleared.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        Self::open_with_ttl(dir, None)
    }

    /// Open with a TTL. Entries older than the TTL behave identically to
    /// absent ones and are removed lazily on access.
    pub fn open_with_ttl(
        dir: impl Into<PathBuf>,
        ttl: Option<Duration>,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let index = Self::load_index(&dir);
        Ok(Self {
            dir,
            ttl,
            index: RwLock::new(index),
        })
    }

    fn load_index(dir: &Path) -> CacheIndex {
        let path = dir.join("index.json");
        match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cache index unreadable, starting fresh");
                CacheIndex::default()
            }),
            Err(_) => CacheIndex::default(),
        }
    }

    fn save_index(&self) {
        let path = self.dir.join("index.json");
        let index = self.index.read();
        match serde_json::to_string_pretty(&*index) {
            Ok(text) => {
                if let Err(e) = fs::write(&path, text) {
                    tracing::warn!(error = %e, "failed to persist cache index");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode cache index"),
        }
    }

    /// Content hash of a file, used as the cache key.
    pub fn file_hash(path: &Path) -> Result<String, StorageError> {
        let bytes = fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.json"))
    }

    fn entry_expired(&self, entry: &CacheIndexEntry) -> bool {
        match self.ttl {
            Some(ttl) => Utc::now() - entry.cached_at > ttl,
            None => false,
        }
    }

    /// Look up cached extraction results for a source file.
    ///
    /// Returns `None` on miss, TTL expiry, file-size mismatch, or any IO
    /// problem — a degraded cache is indistinguishable from an empty one.
    pub fn get(&self, source: &Path) -> Option<CachedExtraction> {
        let hash = Self::file_hash(source).ok()?;
        let file_size = fs::metadata(source).ok()?.len();

        let expired = {
            let index = self.index.read();
            let entry = index.entries.get(&hash)?;
            if entry.file_size != file_size {
                return None;
            }
            self.entry_expired(entry)
        };

        if expired {
            self.remove(&hash);
            return None;
        }

        let blob = fs::read_to_string(self.blob_path(&hash)).ok()?;
        match serde_json::from_str::<CachedExtraction>(&blob) {
            Ok(cached) => {
                tracing::debug!(
                    source = %source.display(),
                    pages = cached.pages.len(),
                    "page-text cache hit"
                );
                Some(cached)
            }
            Err(e) => {
                tracing::warn!(error = %e, "cache blob unreadable, treating as miss");
                self.remove(&hash);
                None
            }
        }
    }

    /// Store extraction results for a source file. Returns whether the
    /// entry was written.
    pub fn put(&self, source: &Path, full_text: &str, pages: &[PageText]) -> bool {
        let (hash, file_size) = match (Self::file_hash(source), fs::metadata(source)) {
            (Ok(h), Ok(m)) => (h, m.len()),
            _ => return false,
        };

        let cached = CachedExtraction {
            source_path: source.to_string_lossy().to_string(),
            full_text: full_text.to_string(),
            pages: pages.to_vec(),
            cached_at: Utc::now(),
        };

        let blob = match serde_json::to_string(&cached) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode cache entry");
                return false;
            }
        };
        if let Err(e) = fs::write(self.blob_path(&hash), blob) {
            tracing::warn!(error = %e, "failed to write cache entry");
            return false;
        }

        self.index.write().entries.insert(
            hash,
            CacheIndexEntry {
                file_size,
                page_count: pages.len(),
                total_chars: full_text.len(),
                cached_at: cached.cached_at,
            },
        );
        self.save_index();
        true
    }

    fn remove(&self, hash: &str) {
        self.index.write().entries.remove(hash);
        let _ = fs::remove_file(self.blob_path(hash));
        self.save_index();
    }

    /// Drop all entries.
    pub fn clear(&self) -> usize {
        let hashes: Vec<String> = self.index.read().entries.keys().cloned().collect();
        for hash in &hashes {
            let _ = fs::remove_file(self.blob_path(hash));
        }
        self.index.write().entries.clear();
        self.save_index();
        hashes.len()
    }

    /// Drop entries older than the given age. Returns how many were
    /// removed.
    pub fn clear_older_than(&self, age: Duration) -> usize {
        let cutoff = Utc::now() - age;
        let stale: Vec<String> = self
            .index
            .read()
            .entries
            .iter()
            .filter(|(_, e)| e.cached_at < cutoff)
            .map(|(h, _)| h.clone())
            .collect();
        for hash in &stale {
            self.remove(hash);
        }
        stale.len()
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.read();
        CacheStats {
            entries: index.entries.len(),
            total_chars: index.entries.values().map(|e| e.total_chars).sum(),
            total_pages: index.entries.values().map(|e| e.page_count).sum(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_chars: usize,
    pub total_pages: usize,
}

// ============================================================================
// Processing ledger
// ============================================================================

/// One processing run, as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub document: String,
    pub processing_type: String,
    pub result_path: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Append-only JSON-lines ledger of processing runs.
pub struct ProcessingLedger {
    path: PathBuf,
}

impl ProcessingLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    /// Append a record. The core pipeline never reads the ledger back.
    pub fn append(&self, record: &ProcessingRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// All records, oldest first. Unparseable lines are skipped. For
    /// history listings only.
    pub fn records(&self) -> Result<Vec<ProcessingRecord>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn pages() -> Vec<PageText> {
        vec![PageText::new(1, "page one"), PageText::new(2, "page two")]
    }

    #[test]
    fn cache_round_trip() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "doc.pdf", "pdf bytes");
        let cache = PageCache::open(dir.path().join("cache")).unwrap();

        assert!(cache.get(&source).is_none());
        assert!(cache.put(&source, "page one\npage two", &pages()));

        let hit = cache.get(&source).expect("cache hit");
        assert_eq!(hit.pages.len(), 2);
        assert_eq!(hit.full_text, "page one\npage two");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_pages, 2);
    }

    #[test]
    fn modified_source_misses_cache() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "doc.pdf", "original bytes");
        let cache = PageCache::open(dir.path().join("cache")).unwrap();
        cache.put(&source, "text", &pages());

        fs::write(&source, "changed bytes!").unwrap();
        assert!(cache.get(&source).is_none(), "content hash must invalidate");
    }

    #[test]
    fn expired_entry_behaves_as_absent() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "doc.pdf", "pdf bytes");
        // Zero TTL: everything is expired the moment it lands.
        let cache =
            PageCache::open_with_ttl(dir.path().join("cache"), Some(Duration::zero())).unwrap();
        cache.put(&source, "text", &pages());
        assert!(cache.get(&source).is_none());
        // The expired entry is also physically gone.
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn cache_survives_reopen() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "doc.pdf", "pdf bytes");
        {
            let cache = PageCache::open(dir.path().join("cache")).unwrap();
            cache.put(&source, "text", &pages());
        }
        let cache = PageCache::open(dir.path().join("cache")).unwrap();
        assert!(cache.get(&source).is_some());
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path(), "doc.pdf", "pdf bytes");
        let cache = PageCache::open(dir.path().join("cache")).unwrap();
        cache.put(&source, "text", &pages());
        assert_eq!(cache.clear(), 1);
        assert!(cache.get(&source).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn ledger_appends_and_reads_back_in_order() {
        let dir = tempdir().unwrap();
        let ledger = ProcessingLedger::open(dir.path().join("ledger.jsonl")).unwrap();

        for i in 0..3 {
            ledger
                .append(&ProcessingRecord {
                    document: format!("doc-{i}.pdf"),
                    processing_type: "rag_summary".into(),
                    result_path: format!("results/doc-{i}.json"),
                    recorded_at: Utc::now(),
                    metadata: serde_json::json!({"citations_count": i}),
                })
                .unwrap();
        }

        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].document, "doc-0.pdf");
        assert_eq!(records[2].metadata["citations_count"], 2);
    }

    #[test]
    fn empty_ledger_reads_as_empty() {
        let dir = tempdir().unwrap();
        let ledger = ProcessingLedger::open(dir.path().join("missing.jsonl")).unwrap();
        assert!(ledger.records().unwrap().is_empty());
    }
}
