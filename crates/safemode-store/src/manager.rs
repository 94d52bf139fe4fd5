//! Ephemeral store manager
//!
//! Owns one `UserStore` per active user. Creation is single-flight per
//! user; idle stores are reclaimed by a periodic sweep that compares each
//! store's deadline against the monotonic clock.

use crate::user_store::UserStore;
use parking_lot::Mutex;
use safemode_backup::BundleProvider;
use safemode_common::config::StoreConfig;
use safemode_common::{Category, Document, Filter, QueryOptions, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

struct StoreEntry {
    store: Arc<UserStore>,
    last_access: Instant,
}

impl StoreEntry {
    fn deadline(&self, idle_timeout: Duration) -> Instant {
        self.last_access + idle_timeout
    }
}

/// Snapshot of one user's store for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStoreStats {
    pub user_id: String,
    pub backup_id: String,
    pub idle_seconds: u64,
    pub evicts_in_seconds: u64,
    pub documents: usize,
}

/// Snapshot of every active store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub active_users: usize,
    pub per_user: Vec<UserStoreStats>,
}

/// Claim on a per-user creation lock; the map entry goes with the last claim
struct CreationLock<'a> {
    manager: &'a EphemeralStoreManager,
    user_id: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for CreationLock<'_> {
    fn drop(&mut self) {
        let mut creating = self.manager.creating.lock();
        // one reference in the map, one held here
        if Arc::strong_count(&self.lock) <= 2 {
            creating.remove(self.user_id);
        }
    }
}

/// Per-user ephemeral stores with idle eviction
pub struct EphemeralStoreManager {
    provider: Arc<dyn BundleProvider>,
    config: StoreConfig,
    stores: Mutex<HashMap<String, StoreEntry>>,
    /// Per-user creation locks; an entry lives only while a creation is in flight
    creating: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EphemeralStoreManager {
    pub fn new(provider: Arc<dyn BundleProvider>, config: StoreConfig) -> Self {
        Self {
            provider,
            config,
            stores: Mutex::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
        }
    }

    pub const fn idle_timeout(&self) -> Duration {
        self.config.idle_timeout()
    }

    /// Return the user's store, bumping its deadline
    ///
    /// A store already past its deadline is treated as gone even if the
    /// sweep has not reached it yet.
    fn touch(&self, user_id: &str) -> Option<Arc<UserStore>> {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout();
        let mut stores = self.stores.lock();
        let expired = match stores.get_mut(user_id) {
            Some(entry) if entry.deadline(idle_timeout) > now => {
                entry.last_access = now;
                return Some(Arc::clone(&entry.store));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            stores.remove(user_id);
            info!(user_id = %user_id, "evicted idle ephemeral store on access");
        }
        None
    }

    fn creation_lock<'a>(&'a self, user_id: &'a str) -> CreationLock<'a> {
        let lock = Arc::clone(self.creating.lock().entry(user_id.to_string()).or_default());
        CreationLock {
            manager: self,
            user_id,
            lock,
        }
    }

    /// Existing store for the user, or a new one built from the result cache
    ///
    /// Concurrent calls for the same user share a single extraction. A
    /// cancelled call releases its claim on the creation lock.
    pub async fn ensure_store(&self, user_id: &str, limit: usize) -> Result<Arc<UserStore>> {
        if let Some(store) = self.touch(user_id) {
            return Ok(store);
        }

        let creation = self.creation_lock(user_id);
        let _guard = creation.lock.lock().await;
        match self.touch(user_id) {
            Some(store) => Ok(store),
            None => self.create_store(user_id, limit).await,
        }
    }

    async fn create_store(&self, user_id: &str, limit: usize) -> Result<Arc<UserStore>> {
        let bundle = self.provider.get_or_extract(user_id, limit).await?;
        let store = Arc::new(UserStore::from_bundle(bundle));
        info!(
            user_id = %user_id,
            backup_id = %store.backup_id(),
            documents = store.document_count(),
            truncated = store.is_truncated(),
            "created ephemeral store"
        );
        self.stores.lock().insert(
            user_id.to_string(),
            StoreEntry {
                store: Arc::clone(&store),
                last_access: Instant::now(),
            },
        );
        Ok(store)
    }

    /// The user's store if one is live; counts as an access
    pub fn store(&self, user_id: &str) -> Option<Arc<UserStore>> {
        self.touch(user_id)
    }

    /// Equality match over one category; empty when the user has no store
    pub fn find(
        &self,
        user_id: &str,
        category: Category,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Vec<Document> {
        self.touch(user_id)
            .map(|store| store.find(category, filter, options))
            .unwrap_or_default()
    }

    pub fn find_one(&self, user_id: &str, category: Category, filter: &Filter) -> Option<Document> {
        self.touch(user_id)
            .and_then(|store| store.find_one(category, filter))
    }

    pub fn count(&self, user_id: &str, category: Category, filter: &Filter) -> usize {
        self.touch(user_id)
            .map_or(0, |store| store.count(category, filter))
    }

    pub fn get_by_id(&self, user_id: &str, category: Category, id: &str) -> Option<Document> {
        self.touch(user_id)
            .and_then(|store| store.get_by_id(category, id).cloned())
    }

    /// Resolve references in `field` against the user's `ref_category` collection
    ///
    /// Documents come back unchanged when the user has no store.
    pub fn populate_reference(
        &self,
        user_id: &str,
        docs: Vec<Document>,
        field: &str,
        ref_category: Category,
        select: &[&str],
    ) -> Vec<Document> {
        match self.touch(user_id) {
            Some(store) => store.populate_reference(docs, field, ref_category, select),
            None => docs,
        }
    }

    /// Drop the user's store; readers holding it keep their snapshot
    pub fn evict(&self, user_id: &str) -> bool {
        let removed = self.stores.lock().remove(user_id).is_some();
        if removed {
            info!(user_id = %user_id, "evicted ephemeral store");
        }
        removed
    }

    /// Drop every store
    pub fn evict_all(&self) -> usize {
        let drained: Vec<String> = self.stores.lock().drain().map(|(id, _)| id).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "evicted all ephemeral stores");
        }
        drained.len()
    }

    /// Evict every store past its deadline, returning the evicted user ids
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout();
        let mut evicted = Vec::new();
        self.stores.lock().retain(|user_id, entry| {
            let live = entry.deadline(idle_timeout) > now;
            if !live {
                evicted.push(user_id.clone());
            }
            live
        });
        for user_id in &evicted {
            info!(user_id = %user_id, "evicted idle ephemeral store");
        }
        evicted
    }

    /// Start the background sweep; the task ends once the manager is dropped
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    debug!("store manager dropped, stopping sweeper");
                    break;
                };
                let evicted = manager.sweep_expired();
                debug!(
                    evicted = evicted.len(),
                    active = manager.active_users(),
                    "ephemeral store sweep"
                );
            }
        })
    }

    /// Number of live stores
    pub fn active_users(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout();
        self.stores
            .lock()
            .values()
            .filter(|entry| entry.deadline(idle_timeout) > now)
            .count()
    }

    /// Observability snapshot; stores past their deadline are not reported
    pub fn stats(&self) -> StoreStats {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout();
        let mut per_user: Vec<UserStoreStats> = self
            .stores
            .lock()
            .iter()
            .filter(|(_, entry)| entry.deadline(idle_timeout) > now)
            .map(|(user_id, entry)| UserStoreStats {
                user_id: user_id.clone(),
                backup_id: entry.store.backup_id().to_string(),
                idle_seconds: now.duration_since(entry.last_access).as_secs(),
                evicts_in_seconds: entry.deadline(idle_timeout).duration_since(now).as_secs(),
                documents: entry.store.document_count(),
            })
            .collect();
        per_user.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        StoreStats {
            active_users: per_user.len(),
            per_user,
        }
    }
}
