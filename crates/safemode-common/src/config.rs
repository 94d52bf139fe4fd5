//! Configuration types for the failover layer
//!
//! Every section has a `Default` so a partial file (or none at all) still
//! yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Primary store health probing
    pub health: HealthConfig,
    /// Backup location and extraction
    pub backup: BackupConfig,
    /// Result cache expiries
    pub cache: CacheConfig,
    /// Ephemeral per-user stores
    pub store: StoreConfig,
    /// Failover login
    pub login: LoginConfig,
}

/// Primary store health probing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Human-readable primary store target, reported by `status()`
    pub target: String,
    /// Upper bound for a single liveness ping
    pub ping_timeout_ms: u64,
    /// Poll interval used by `wait_until_healthy`
    pub wait_poll_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            target: "mongodb://localhost:27017".to_string(),
            ping_timeout_ms: 2_000,
            wait_poll_interval_ms: 500,
        }
    }
}

impl HealthConfig {
    pub const fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub const fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }
}

/// Backup location and extraction
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Default per-category item limit for extraction
    pub item_limit: usize,
    /// Stop scanning after this many lines (unbounded when unset)
    pub max_scan_lines: Option<usize>,
    /// Fast-cache key holding the shadow copy of the latest full backup pointer
    pub pointer_cache_key: String,
    /// Expiry for the shadow pointer (7 days)
    pub pointer_ttl_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            item_limit: 50,
            max_scan_lines: None,
            pointer_cache_key: "backup:latest".to_string(),
            pointer_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl BackupConfig {
    pub const fn pointer_ttl(&self) -> Duration {
        Duration::from_secs(self.pointer_ttl_secs)
    }
}

/// Result cache expiries
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expiry for extracted user bundles (1 hour)
    pub bundle_ttl_secs: u64,
    /// Expiry for profile lookups by wallet or email (30 minutes)
    pub profile_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bundle_ttl_secs: 60 * 60,
            profile_ttl_secs: 30 * 60,
        }
    }
}

impl CacheConfig {
    pub const fn bundle_ttl(&self) -> Duration {
        Duration::from_secs(self.bundle_ttl_secs)
    }

    pub const fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }
}

/// Ephemeral per-user stores
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Inactivity window after which a user's store is evicted (5 minutes)
    pub idle_timeout_secs: u64,
    /// Interval of the background eviction sweep
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 5 * 60,
            sweep_interval_secs: 30,
        }
    }
}

impl StoreConfig {
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Failover login
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// HMAC secret for session tokens; must match the normal login path
    pub jwt_secret: String,
    /// Token validity window (24 hours)
    pub token_ttl_secs: u64,
    /// Warning shown to users logged in through the failover path
    pub warning: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: 24 * 60 * 60,
            warning: "The service is running in safe mode. Data shown may be out of date and \
                      changes cannot be saved until normal service resumes."
                .to_string(),
        }
    }
}

impl LoginConfig {
    pub const fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.store.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.cache.bundle_ttl(), Duration::from_secs(3600));
        assert_eq!(config.cache.profile_ttl(), Duration::from_secs(1800));
        assert_eq!(config.backup.pointer_ttl(), Duration::from_secs(604_800));
        assert!(config.backup.max_scan_lines.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"store": {"idle_timeout_secs": 60}}"#).unwrap();
        assert_eq!(config.store.idle_timeout_secs, 60);
        assert_eq!(config.store.sweep_interval_secs, 30);
        assert_eq!(config.backup.item_limit, 50);
    }
}
