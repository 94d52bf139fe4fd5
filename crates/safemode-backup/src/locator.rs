//! Backup locator
//!
//! Resolves the most recent full backup. The ledger is the durable source of
//! truth; the fast cache keeps a short-lived shadow pointer that is only
//! consulted when the ledger cannot answer.

use crate::kv::KvCache;
use crate::ledger::BackupLedger;
use chrono::Utc;
use safemode_common::config::BackupConfig;
use safemode_common::{BackupPointer, Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Two-tier lookup of the latest full backup pointer
pub struct BackupLocator {
    ledger: Arc<dyn BackupLedger>,
    cache: Arc<dyn KvCache>,
    config: BackupConfig,
}

impl BackupLocator {
    pub fn new(ledger: Arc<dyn BackupLedger>, cache: Arc<dyn KvCache>, config: BackupConfig) -> Self {
        Self {
            ledger,
            cache,
            config,
        }
    }

    /// Latest active full backup, or `None` when recovery is impossible right now
    ///
    /// Never fails. The cache shadow is read only when the ledger errors; an
    /// empty answer from a reachable ledger is final.
    pub async fn latest_full_backup(&self) -> Option<BackupPointer> {
        match self.ledger.latest_full_backup().await {
            Ok(Some(pointer)) => {
                debug!(backup_id = %pointer.backup_id, "latest full backup resolved from ledger");
                Some(pointer)
            }
            Ok(None) => {
                debug!("ledger holds no active full backup");
                None
            }
            Err(e) => {
                warn!(error = %e, "ledger lookup failed, falling back to cache shadow");
                self.cached_pointer().await
            }
        }
    }

    async fn cached_pointer(&self) -> Option<BackupPointer> {
        let raw = match self.cache.get(&self.config.pointer_cache_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "cache lookup for backup pointer failed");
                return None;
            }
        };
        match serde_json::from_str::<BackupPointer>(&raw) {
            Ok(pointer) if pointer.is_active_full() => {
                info!(
                    backup_id = %pointer.backup_id,
                    address = %pointer.content_address,
                    "using cached backup pointer"
                );
                Some(pointer)
            }
            Ok(pointer) => {
                warn!(backup_id = %pointer.backup_id, "cached backup pointer is not an active full backup");
                None
            }
            Err(e) => {
                warn!(error = %e, "cached backup pointer is unreadable");
                None
            }
        }
    }

    /// Shadow a freshly uploaded full backup into the cache
    ///
    /// Called by the backup job after upload. The ledger stays primary.
    pub async fn record_latest_backup(&self, content_address: &str) -> Result<BackupPointer> {
        let pointer = BackupPointer::full(
            uuid::Uuid::new_v4().to_string(),
            content_address,
            Utc::now(),
        );
        let raw = serde_json::to_string(&pointer)?;
        self.cache
            .set(&self.config.pointer_cache_key, raw, self.config.pointer_ttl())
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        info!(address = %content_address, "recorded latest backup pointer in cache");
        Ok(pointer)
    }

    /// A full backup followed by its incremental chain, oldest first
    pub async fn backup_chain(&self, full: &BackupPointer) -> Result<Vec<BackupPointer>> {
        let incrementals = self
            .ledger
            .incremental_chain(&full.backup_id)
            .await
            .map_err(|e| Error::Ledger(e.to_string()))?;
        let mut chain = Vec::with_capacity(incrementals.len() + 1);
        chain.push(full.clone());
        chain.extend(incrementals);
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvCache;
    use crate::ledger::MemoryLedger;
    use safemode_common::BackupType;

    fn locator(ledger: Arc<MemoryLedger>, cache: Arc<MemoryKvCache>) -> BackupLocator {
        BackupLocator::new(ledger, cache, BackupConfig::default())
    }

    #[tokio::test]
    async fn test_ledger_is_preferred() {
        let ledger = Arc::new(MemoryLedger::new());
        let cache = Arc::new(MemoryKvCache::new());
        ledger
            .log_backup("ledger-b", BackupType::Full, "ledger-addr", Utc::now(), None)
            .await
            .unwrap();
        let locator = locator(ledger, cache);
        locator.record_latest_backup("cache-addr").await.unwrap();

        let pointer = locator.latest_full_backup().await.unwrap();
        assert_eq!(pointer.content_address, "ledger-addr");
    }

    #[tokio::test]
    async fn test_falls_back_to_cache_when_ledger_throws() {
        let ledger = Arc::new(MemoryLedger::new());
        let cache = Arc::new(MemoryKvCache::new());
        let locator = locator(ledger.clone(), cache);
        locator.record_latest_backup("cache-addr").await.unwrap();
        ledger.set_available(false);

        let pointer = locator.latest_full_backup().await.unwrap();
        assert_eq!(pointer.content_address, "cache-addr");
    }

    #[tokio::test]
    async fn test_reachable_ledger_without_backup_ignores_shadow() {
        let ledger = Arc::new(MemoryLedger::new());
        let cache = Arc::new(MemoryKvCache::new());
        ledger
            .log_backup("b1", BackupType::Full, "addr1", Utc::now(), None)
            .await
            .unwrap();
        let locator = locator(ledger.clone(), cache);
        locator.record_latest_backup("addr1").await.unwrap();
        ledger.mark_deleted("b1").unwrap();

        assert!(locator.latest_full_backup().await.is_none());
    }

    #[tokio::test]
    async fn test_none_when_no_source_has_pointer() {
        let ledger = Arc::new(MemoryLedger::new());
        let cache = Arc::new(MemoryKvCache::new());
        ledger.set_available(false);
        cache.set_available(false);
        assert!(locator(ledger, cache).latest_full_backup().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shadow_pointer_expires_after_a_week() {
        let ledger = Arc::new(MemoryLedger::new());
        let cache = Arc::new(MemoryKvCache::new());
        let locator = locator(ledger.clone(), cache);
        locator.record_latest_backup("cache-addr").await.unwrap();
        ledger.set_available(false);

        tokio::time::advance(std::time::Duration::from_secs(7 * 24 * 60 * 60)).await;
        assert!(locator.latest_full_backup().await.is_none());
    }

    #[tokio::test]
    async fn test_backup_chain() {
        let ledger = Arc::new(MemoryLedger::new());
        let now = Utc::now();
        ledger
            .log_backup("f", BackupType::Full, "a0", now, None)
            .await
            .unwrap();
        ledger
            .log_backup("i", BackupType::Incremental, "a1", now, Some("f"))
            .await
            .unwrap();
        let locator = locator(ledger, Arc::new(MemoryKvCache::new()));
        let full = locator.latest_full_backup().await.unwrap();
        let chain = locator.backup_chain(&full).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].backup_id, "i");
    }
}
