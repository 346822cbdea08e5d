//! Two-tier schema cache.
//!
//! The memory tier holds built [`Schema`]s with an expiry. The disk tier holds
//! the raw [`SchemaData`] as `<dir>/<digest>.json` and judges staleness by the
//! file modification time. Both are keyed by the SHA-256 digest of the
//! caller's cache key.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use pb_core::{Error, Result};
use prost::Message as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::descriptor::FileDescriptorProto;
use crate::schema::Schema;
use crate::source::SchemaData;

/// Where and for how long a resolution is cached.
///
/// Without a key nothing is cached. With a key the built schema is kept in
/// memory; with a directory as well, the raw data is also written to disk.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub key: Option<String>,
    pub dir: Option<PathBuf>,
    pub ttl: Duration,
}

impl CacheOptions {
    pub fn memory(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: Some(key.into()),
            dir: None,
            ttl,
        }
    }

    pub fn disk(key: impl Into<String>, dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            key: Some(key.into()),
            dir: Some(dir.into()),
            ttl,
        }
    }

    /// The digest entries are stored under, if caching is enabled.
    pub fn digest(&self) -> Option<String> {
        self.key.as_deref().map(hash_key)
    }
}

pub fn hash_key(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

struct MemoryEntry {
    schema: Arc<Schema>,
    expires_at: Instant,
}

#[derive(Serialize, Deserialize)]
struct DiskEntry {
    file_descriptors: Vec<String>,
    service_set: Vec<String>,
}

/// Process-local schema cache. Construct once and share by `Arc`.
#[derive(Default)]
pub struct SchemaCache {
    memory: DashMap<String, MemoryEntry>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A live schema for `digest`. Expired entries are evicted on access.
    pub fn get(&self, digest: &str) -> Option<Arc<Schema>> {
        let entry = self.memory.get(digest)?;
        if Instant::now() >= entry.expires_at {
            drop(entry);
            self.memory.remove(digest);
            debug!(digest, "schema cache entry expired");
            return None;
        }
        Some(Arc::clone(&entry.schema))
    }

    pub fn insert(&self, digest: &str, schema: Arc<Schema>, ttl: Duration) {
        self.memory.insert(
            digest.to_string(),
            MemoryEntry {
                schema,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn invalidate(&self, digest: &str) -> bool {
        self.memory.remove(digest).is_some()
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Drops every expired memory entry.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.memory.retain(|_, entry| entry.expires_at > now);
    }

    /// Reads a fresh disk entry. Missing, stale or unreadable files are misses.
    pub fn load_disk(dir: &Path, digest: &str, ttl: Duration) -> Option<SchemaData> {
        let path = entry_path(dir, digest);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age >= ttl {
            debug!(path = %path.display(), "disk cache entry stale");
            return None;
        }
        let bytes = std::fs::read(&path).ok()?;
        match decode_entry(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt disk cache entry");
                None
            }
        }
    }

    /// Writes `data` to disk. Failures are logged and otherwise ignored.
    pub fn store_disk(dir: &Path, digest: &str, data: &SchemaData) {
        let path = entry_path(dir, digest);
        let result = std::fs::create_dir_all(dir)
            .map_err(Error::from)
            .and_then(|_| encode_entry(data))
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(Error::from));
        match result {
            Ok(()) => debug!(path = %path.display(), "wrote disk cache entry"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write disk cache entry"),
        }
    }
}

fn entry_path(dir: &Path, digest: &str) -> PathBuf {
    dir.join(format!("{digest}.json"))
}

fn encode_entry(data: &SchemaData) -> Result<Vec<u8>> {
    let entry = DiskEntry {
        file_descriptors: data
            .files
            .iter()
            .map(|file| STANDARD.encode(file.encode_to_vec()))
            .collect(),
        service_set: data.service_set.clone(),
    };
    Ok(serde_json::to_vec(&entry)?)
}

fn decode_entry(bytes: &[u8]) -> Result<SchemaData> {
    let entry: DiskEntry = serde_json::from_slice(bytes)?;
    let files = entry
        .file_descriptors
        .iter()
        .map(|encoded| {
            let raw = STANDARD
                .decode(encoded)
                .map_err(|e| Error::Internal(format!("invalid base64 descriptor: {e}")))?;
            Ok(FileDescriptorProto::decode(raw.as_slice())?)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SchemaData {
        files,
        service_set: entry.service_set,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            hash_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(CacheOptions::default().digest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_entries_expire() {
        let cache = SchemaCache::new();
        cache.insert("k", testing::library_schema(), Duration::from_secs(60));
        assert!(cache.get("k").is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_drops_only_expired_entries() {
        let cache = SchemaCache::new();
        cache.insert("short", testing::library_schema(), Duration::from_secs(1));
        cache.insert("long", testing::library_schema(), Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(2)).await;
        cache.cleanup_expired();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn disk_entry_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let data = testing::library_data();
        SchemaCache::store_disk(dir.path(), "digest", &data);
        assert!(dir.path().join("digest.json").exists());

        let loaded = SchemaCache::load_disk(dir.path(), "digest", Duration::from_secs(3600)).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn disk_entry_uses_base64_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        SchemaCache::store_disk(dir.path(), "digest", &testing::library_data());
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("digest.json")).unwrap()).unwrap();
        assert_eq!(raw["service_set"][0], "library.v1.LibraryService");
        let first = raw["file_descriptors"][0].as_str().unwrap();
        assert!(STANDARD.decode(first).is_ok());
    }

    #[test]
    fn corrupt_or_missing_disk_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SchemaCache::load_disk(dir.path(), "absent", Duration::from_secs(60)).is_none());
        std::fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        assert!(SchemaCache::load_disk(dir.path(), "bad", Duration::from_secs(60)).is_none());
    }

    #[test]
    fn zero_ttl_never_reuses_disk_entries() {
        let dir = tempfile::tempdir().unwrap();
        SchemaCache::store_disk(dir.path(), "digest", &testing::library_data());
        assert!(SchemaCache::load_disk(dir.path(), "digest", Duration::ZERO).is_none());
    }
}
