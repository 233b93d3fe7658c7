use chrono::{Duration, Utc};
use dashmap::DashMap;
use ethers::types::{Address, Bytes};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::errors::Result;

/// Default time-to-live for cached bytecode
pub const DEFAULT_TTL_DAYS: i64 = 7;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    /// Unix seconds
    fetched_at: i64,
    /// Hex without prefix
    code: String,
}

/// Filesystem-backed bytecode cache keyed by (network, address).
///
/// Entries for a key are always recomputed to the same value, so concurrent
/// writers need no locking: each writes its own temp file and renames it into
/// place.
#[derive(Debug)]
pub struct CodeCache {
    dir: PathBuf,
    ttl: Duration,
    memory: DashMap<(String, Address), CacheEntry>,
}

impl CodeCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            memory: DashMap::new(),
        }
    }

    pub fn with_default_ttl(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, Duration::days(DEFAULT_TTL_DAYS))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, network: &str, address: &Address) -> PathBuf {
        self.dir.join(network).join(format!("{address:x}.json"))
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        Utc::now().timestamp() - entry.fetched_at < self.ttl.num_seconds()
    }

    /// Cached code if present and younger than the TTL
    pub async fn get(&self, network: &str, address: &Address) -> Result<Option<Bytes>> {
        let key = (network.to_string(), *address);
        if let Some(entry) = self.memory.get(&key) {
            if self.is_fresh(&entry) {
                return Ok(decode(&entry));
            }
        }

        let path = self.path(network, address);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        if !self.is_fresh(&entry) {
            debug!("Cache entry {} expired", path.display());
            return Ok(None);
        }

        let code = decode(&entry);
        if code.is_some() {
            self.memory.insert(key, entry);
        }
        Ok(code)
    }

    pub async fn put(&self, network: &str, address: &Address, code: &Bytes) -> Result<()> {
        let entry = CacheEntry {
            fetched_at: Utc::now().timestamp(),
            code: hex::encode(code.as_ref()),
        };

        let path = self.path(network, address);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, serde_json::to_vec(&entry)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        self.memory.insert((network.to_string(), *address), entry);
        Ok(())
    }
}

fn decode(entry: &CacheEntry) -> Option<Bytes> {
    hex::decode(&entry.code).ok().map(Bytes::from)
}
