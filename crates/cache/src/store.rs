//! Filesystem-backed result store.
//!
//! One JSON file per entry under the shared cache root, written atomically
//! (temp + rename) so concurrent readers in other build processes never see
//! a partial entry. The read path never errors: a missing, expired, corrupt
//! or undecodable entry is a miss, because this cache is a performance
//! optimization and must never fail a build that would otherwise succeed.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::{debug, warn};

use schemaforge_core::fsio::write_atomic;
use schemaforge_core::hash::hash_file_or_sentinel;

use crate::entry::{CacheEntry, CacheMetadata, compress_result};
use crate::key::KeyEnvelope;
use crate::{Error, Result};

/// Operations that are never cached regardless of configuration.
const NEVER_CACHEABLE: &[&str] = &["clean"];

/// Default TTL per operation kind.
///
/// Validation-like operations stay fresh for a day (their output depends
/// only on the fingerprinted inputs), generated artifacts are conservative,
/// documentation sits in between.
#[must_use]
pub fn default_ttl(operation: &str) -> Duration {
    match operation {
        "validate" | "check" | "lint" => Duration::hours(24),
        "docs" | "documentation" => Duration::hours(12),
        _ => Duration::hours(1),
    }
}

/// Configuration for the result cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory shared with the toolchain store
    pub cache_root: PathBuf,
    /// Eviction threshold for the sum of all entry files
    pub max_total_bytes: u64,
    /// Whether large results are compressed before storage
    pub compression: bool,
    /// Serialized-result size above which compression kicks in
    pub compression_threshold: u64,
    /// Per-operation TTL overrides, in seconds
    pub ttl_overrides: BTreeMap<String, u64>,
    /// Operations that must never be cached (in addition to "clean")
    pub non_cacheable: BTreeSet<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("schemaforge"),
            max_total_bytes: 512 * 1024 * 1024,
            compression: true,
            compression_threshold: 16 * 1024,
            ttl_overrides: BTreeMap::new(),
            non_cacheable: BTreeSet::new(),
        }
    }
}

impl CacheConfig {
    /// Create a config rooted at the given directory.
    #[must_use]
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Set the eviction threshold.
    #[must_use]
    pub fn with_max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    /// Toggle result compression.
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Set the compression threshold in bytes.
    #[must_use]
    pub fn with_compression_threshold(mut self, bytes: u64) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// Override the TTL for one operation, in seconds.
    #[must_use]
    pub fn with_ttl_override(mut self, operation: impl Into<String>, seconds: u64) -> Self {
        self.ttl_overrides.insert(operation.into(), seconds);
        self
    }

    /// Mark an operation as never cacheable.
    #[must_use]
    pub fn with_non_cacheable(mut self, operation: impl Into<String>) -> Self {
        self.non_cacheable.insert(operation.into());
        self
    }
}

/// Options for validity checks.
#[derive(Debug, Clone)]
pub struct ValidityOptions {
    /// Re-hash every recorded input file and require it to match
    pub check_files: bool,
}

impl Default for ValidityOptions {
    fn default() -> Self {
        Self { check_files: true }
    }
}

/// Observability snapshot of the cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub human_size: String,
    /// Hits over lookups for this process; 0.0 before the first lookup
    pub hit_rate: f64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Filesystem-backed operation result cache.
///
/// One instance per process, constructed with explicit configuration.
/// Multiple processes may share the same root; all writes are staged to
/// unique temp names and renamed into place.
#[derive(Debug)]
pub struct ResultCache {
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct EntryFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl ResultCache {
    /// Create a cache over the configured root.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The configuration this cache was constructed with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Path of the entry file for a key. Pure.
    #[must_use]
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.config.cache_root.join(format!("{key}.json"))
    }

    fn is_cacheable(&self, operation: &str) -> bool {
        !NEVER_CACHEABLE.contains(&operation)
            && !self.config.non_cacheable.contains(operation)
    }

    fn ttl_for(&self, operation: &str) -> Duration {
        self.config
            .ttl_overrides
            .get(operation)
            .map_or_else(
                || default_ttl(operation),
                |secs| Duration::seconds(i64::try_from(*secs).unwrap_or(i64::MAX)),
            )
    }

    /// Store an operation result under `key`.
    ///
    /// Non-cacheable operations are skipped silently. After a successful
    /// write the eviction sweep runs, deleting oldest-modified entries until
    /// the total entry size is back under the configured maximum.
    pub fn store(
        &self,
        key: &str,
        result: &serde_json::Value,
        envelope: &KeyEnvelope,
    ) -> Result<()> {
        if !self.is_cacheable(&envelope.operation) {
            debug!(operation = %envelope.operation, "Operation is not cacheable, skipping store");
            return Ok(());
        }

        let created = Utc::now();
        let metadata =
            CacheMetadata::from_envelope(envelope, created, created + self.ttl_for(&envelope.operation));

        let serialized = serde_json::to_vec(result)
            .map_err(|e| Error::serialization(format!("Failed to serialize result: {e}")))?;
        let (stored_result, compressed) = if self.config.compression
            && serialized.len() as u64 > self.config.compression_threshold
        {
            (serde_json::Value::String(compress_result(result)?), true)
        } else {
            (result.clone(), false)
        };

        let entry = CacheEntry {
            key: key.to_string(),
            integrity: CacheEntry::compute_integrity(&stored_result, &metadata)?,
            result: stored_result,
            metadata,
            compressed,
        };

        let path = self.entry_path(key);
        let json = serde_json::to_vec_pretty(&entry)
            .map_err(|e| Error::serialization(format!("Failed to serialize entry: {e}")))?;
        write_atomic(&path, &json)?;
        debug!(%key, compressed, bytes = json.len(), "Stored cache entry");

        self.evict_to_limit();
        Ok(())
    }

    /// Look up a result by key.
    ///
    /// Returns `None` for any miss, expiry, corruption or decompression
    /// failure; corruption is logged.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        match self.load_valid_entry(key) {
            Some(entry) => match entry.decode_result() {
                Some(result) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(result)
                }
                None => {
                    warn!(%key, "Cache entry payload failed to decompress, treating as miss");
                    let _ = std::fs::remove_file(self.entry_path(key));
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check whether an entry exists and is still valid.
    ///
    /// Never errors; every failure mode is `false`.
    #[must_use]
    pub fn is_valid(&self, key: &str, options: &ValidityOptions) -> bool {
        let Some(entry) = self.load_valid_entry(key) else {
            return false;
        };

        if options.check_files {
            for (path, recorded) in &entry.metadata.file_hashes {
                if &hash_file_or_sentinel(Path::new(path)) != recorded {
                    debug!(%key, %path, "Input file drifted, entry invalid");
                    return false;
                }
            }
        }

        true
    }

    /// Delete all entries for a project, optionally narrowed to one
    /// operation. Returns the number of entries removed.
    pub fn invalidate(&self, project: &str, operation: Option<&str>) -> Result<usize> {
        let mut removed = 0usize;
        for file in self.entry_files()? {
            let Some(entry) = read_entry(&file.path) else {
                continue;
            };
            if entry.metadata.project != project {
                continue;
            }
            if let Some(op) = operation {
                if entry.metadata.operation != op {
                    continue;
                }
            }
            if let Err(e) = std::fs::remove_file(&file.path) {
                warn!(path = ?file.path, error = %e, "Failed to remove invalidated entry");
            } else {
                removed += 1;
            }
        }
        debug!(%project, ?operation, removed, "Invalidated cache entries");
        Ok(removed)
    }

    /// Delete every entry and reset the hit/miss counters.
    pub fn clear(&self) -> Result<()> {
        for file in self.entry_files()? {
            std::fs::remove_file(&file.path)
                .map_err(|e| Error::io(e, &file.path, "remove_file"))?;
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Delete entries whose TTL has lapsed. Returns the number removed.
    pub fn prune_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0usize;
        for file in self.entry_files()? {
            let Some(entry) = read_entry(&file.path) else {
                continue;
            };
            if entry.expired_at(now) {
                if let Err(e) = std::fs::remove_file(&file.path) {
                    warn!(path = ?file.path, error = %e, "Failed to remove expired entry");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Observability snapshot: entry count, sizes, hit rate, age bounds.
    pub fn stats(&self) -> Result<CacheStats> {
        let files = self.entry_files()?;
        let total_size_bytes: u64 = files.iter().map(|f| f.size).sum();

        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;
        for file in &files {
            if let Some(entry) = read_entry(&file.path) {
                let created = entry.metadata.created;
                oldest = Some(oldest.map_or(created, |o| o.min(created)));
                newest = Some(newest.map_or(created, |n| n.max(created)));
            }
        }

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        Ok(CacheStats {
            total_entries: files.len(),
            total_size_bytes,
            human_size: human_size(total_size_bytes),
            hit_rate,
            oldest,
            newest,
        })
    }

    /// Load and fully check an entry: parse, expiry, integrity.
    ///
    /// A corrupt entry is removed on detection, so each corruption incident
    /// is logged once and subsequent lookups are plain misses. Expired
    /// entries stay on disk for `prune_expired`.
    fn load_valid_entry(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let content = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "Corrupt cache entry, treating as miss");
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        if entry.expired_at(Utc::now()) {
            debug!(%key, "Cache entry expired");
            return None;
        }

        if !entry.integrity_ok() {
            warn!(%key, "Cache entry failed integrity verification, treating as miss");
            let _ = std::fs::remove_file(&path);
            return None;
        }

        Some(entry)
    }

    /// Entry files under the root: `<key>.json`, excluding the toolchain's
    /// `metadata.json`, version directories and temp staging files.
    fn entry_files(&self) -> Result<Vec<EntryFile>> {
        let root = &self.config.cache_root;
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for dirent in std::fs::read_dir(root).map_err(|e| Error::io(e, root, "read_dir"))? {
            let dirent = dirent.map_err(|e| Error::io(e, root, "read_dir_entry"))?;
            let path = dirent.path();
            if !path.is_file() {
                continue;
            }
            let name = dirent.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(".json") || name == "metadata.json" {
                continue;
            }
            let meta = match dirent.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            files.push(EntryFile {
                path,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(files)
    }

    /// Size-bounded eviction: while total entry size exceeds the limit,
    /// delete oldest-modified entries first. Individual failures are logged
    /// and skipped; the sweep itself never fails a store.
    fn evict_to_limit(&self) {
        let Ok(mut files) = self.entry_files() else {
            return;
        };
        let mut total: u64 = files.iter().map(|f| f.size).sum();
        if total <= self.config.max_total_bytes {
            return;
        }

        files.sort_by_key(|f| f.modified);
        for file in files {
            if total <= self.config.max_total_bytes {
                break;
            }
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    total = total.saturating_sub(file.size);
                    debug!(path = ?file.path, size = file.size, "Evicted cache entry to reduce size");
                }
                Err(e) => {
                    warn!(path = ?file.path, error = %e, "Failed to evict cache entry");
                }
            }
        }
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Human-readable byte count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
