//! Fast key-value cache client
//!
//! Used both as the shadow copy of the latest backup pointer and as the
//! result cache for extracted bundles and profiles.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Errors reported by a cache client
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// String key-value cache with per-key expiry
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache that never returns an entry past its expiry
pub struct MemoryKvCache {
    entries: RwLock<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl Default for MemoryKvCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability; while offline every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_available(&self) -> Result<(), KvError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(KvError::Unavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl KvCache for MemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.check_available()?;
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // Expired: remove lazily
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), KvError> {
        self.check_available()?;
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.check_available()?;
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let cache = MemoryKvCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryKvCache::new();
        cache
            .set("short", "1".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        cache
            .set("long", "2".to_string(), Duration::from_secs(100))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_del_and_offline() {
        let cache = MemoryKvCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        cache.del("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set_available(false);
        assert!(cache.get("k").await.is_err());
    }
}
