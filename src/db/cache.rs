//! Query result caching.
//!
//! Cached result sets are keyed by a fingerprint of the statement text and its
//! bound parameters. The cache is best-effort: a failed store never fails the
//! query, and concurrent writers follow last-writer-wins. Entries expire by
//! TTL and hits are returned verbatim without re-validation.

use crate::models::{QueryParam, Row};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Fingerprint of a statement and its parameters.
///
/// Parameters enter the digest in canonical text form, so the string `"1"` and
/// the integer `1` produce different keys.
pub fn fingerprint(sql: &str, params: &[QueryParam]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    for param in params {
        hasher.update([0u8]);
        hasher.update(param.canonical().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Pluggable result cache.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Fetch a live entry; `None` for a miss or an expired entry.
    async fn get(&self, key: &str) -> Option<Vec<Row>>;

    /// Store an entry with the given TTL. Best-effort.
    async fn set(&self, key: &str, rows: Vec<Row>, ttl: Duration);
}

struct Entry {
    rows: Vec<Row>,
    expires_at: Instant,
}

/// In-process cache with per-entry TTL.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<Row>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!(key = %key, "Result cache hit");
                Some(entry.rows.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, rows: Vec<Row>, ttl: Duration) {
        let entry = Entry {
            rows,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.insert(key.to_string(), entry);
    }
}
