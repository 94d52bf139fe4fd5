//! Time-boxed cache in front of the extractor
//!
//! Repeated requests during an outage should not re-download and re-parse
//! the backup. Bundles live for an hour under `safemode:user:<id>`; profile
//! lookups for thirty minutes under `safemode:wallet:` / `safemode:email:`.
//! Cache failures degrade to a miss: the extractor is always the fallback.

use crate::extractor::BackupSource;
use crate::kv::KvCache;
use async_trait::async_trait;
use safemode_common::config::CacheConfig;
use safemode_common::{ExtractedUserBundle, Profile, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const USER_PREFIX: &str = "safemode:user:";
const WALLET_PREFIX: &str = "safemode:wallet:";
const EMAIL_PREFIX: &str = "safemode:email:";

/// Provider of per-user bundles, as consumed by the ephemeral store manager
#[async_trait]
pub trait BundleProvider: Send + Sync {
    async fn get_or_extract(&self, user_id: &str, limit: usize) -> Result<ExtractedUserBundle>;
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct ResultCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub extractions: AtomicU64,
}

impl ResultCacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

/// Extraction results cached per user and per lookup key
pub struct ResultCache {
    source: Arc<dyn BackupSource>,
    cache: Arc<dyn KvCache>,
    config: CacheConfig,
    stats: ResultCacheStats,
}

fn user_key(user_id: &str) -> String {
    format!("{USER_PREFIX}{user_id}")
}

fn wallet_key(address: &str) -> String {
    format!("{WALLET_PREFIX}{}", address.to_ascii_lowercase())
}

fn email_key(email: &str) -> String {
    format!("{EMAIL_PREFIX}{email}")
}

impl ResultCache {
    pub fn new(source: Arc<dyn BackupSource>, cache: Arc<dyn KvCache>, config: CacheConfig) -> Self {
        Self {
            source,
            cache,
            config,
            stats: ResultCacheStats::default(),
        }
    }

    pub const fn stats(&self) -> &ResultCacheStats {
        &self.stats
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.cache.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "result cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Store a value and return it in the same decoded form a later hit returns
    async fn store<T: Serialize + DeserializeOwned>(&self, key: &str, value: T, ttl: Duration) -> Result<T> {
        let raw = serde_json::to_string(&value)?;
        let decoded = serde_json::from_str(&raw)?;
        if let Err(e) = self.cache.set(key, raw, ttl).await {
            warn!(key, error = %e, "result cache write failed");
        }
        Ok(decoded)
    }

    /// Cached bundle for `user_id`, extracting on a miss
    ///
    /// A cached bundle extracted with a larger limit is narrowed to `limit`;
    /// one extracted with a smaller limit counts as a miss.
    pub async fn get_or_extract(&self, user_id: &str, limit: usize) -> Result<ExtractedUserBundle> {
        let key = user_key(user_id);
        if let Some(bundle) = self.load::<ExtractedUserBundle>(&key).await {
            if bundle.limit >= limit {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(user_id, "bundle served from result cache");
                return Ok(narrow(bundle, limit));
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        self.stats.extractions.fetch_add(1, Ordering::Relaxed);
        let bundle = self.source.extract_user(user_id, limit).await?;
        self.store(&key, bundle, self.config.bundle_ttl()).await
    }

    /// Cached profile lookup by wallet address
    pub async fn by_wallet(&self, address: &str) -> Result<Option<Profile>> {
        let key = wallet_key(address);
        if let Some(profile) = self.load::<Profile>(&key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(profile));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        match self.source.find_user_by_wallet(address).await? {
            Some(profile) => self
                .store(&key, profile, self.config.profile_ttl())
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Cached profile lookup by email
    pub async fn by_email(&self, email: &str) -> Result<Option<Profile>> {
        let key = email_key(email);
        if let Some(profile) = self.load::<Profile>(&key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(profile));
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        match self.source.find_user_by_email(email).await? {
            Some(profile) => self
                .store(&key, profile, self.config.profile_ttl())
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// Drop everything cached for a user
    ///
    /// Profile lookups are cleared too when the cached bundle names the
    /// user's wallet or email.
    pub async fn invalidate(&self, user_id: &str) {
        let key = user_key(user_id);
        let mut keys = vec![key.clone()];
        if let Some(bundle) = self.load::<ExtractedUserBundle>(&key).await {
            if let Some(profile) = &bundle.profile {
                keys.extend(profile.wallet_address().map(wallet_key));
                keys.extend(profile.email().map(email_key));
            }
        }
        for key in keys {
            if let Err(e) = self.cache.del(&key).await {
                warn!(key = %key, error = %e, "result cache invalidation failed");
            }
        }
        debug!(user_id, "invalidated result cache");
    }
}

#[async_trait]
impl BundleProvider for ResultCache {
    async fn get_or_extract(&self, user_id: &str, limit: usize) -> Result<ExtractedUserBundle> {
        Self::get_or_extract(self, user_id, limit).await
    }
}

fn narrow(mut bundle: ExtractedUserBundle, limit: usize) -> ExtractedUserBundle {
    if bundle.limit > limit {
        for slice in &mut bundle.slices {
            slice.items.truncate(limit);
            slice.count = slice.items.len();
        }
        bundle.limit = limit;
    }
    bundle
}
