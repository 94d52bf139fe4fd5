//! Session records in the fast key-value cache

use chrono::{DateTime, Utc};
use safemode_backup::KvCache;
use safemode_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const SESSION_PREFIX: &str = "session:";

/// Identity and login metadata stored per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub login_at: DateTime<Utc>,
    /// Established while the primary store was down
    #[serde(default)]
    pub safe_mode: bool,
}

/// Session records keyed by user id
pub struct SessionManager {
    cache: Arc<dyn KvCache>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(cache: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn key(user_id: &str) -> String {
        format!("{SESSION_PREFIX}{user_id}")
    }

    pub async fn create(&self, record: &SessionRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.cache
            .set(&Self::key(&record.user_id), raw, self.ttl)
            .await
            .map_err(|e| Error::Cache(e.to_string()))
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<SessionRecord>> {
        let raw = self
            .cache
            .get(&Self::key(user_id))
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    pub async fn remove(&self, user_id: &str) -> Result<()> {
        self.cache
            .del(&Self::key(user_id))
            .await
            .map_err(|e| Error::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safemode_backup::MemoryKvCache;

    fn record() -> SessionRecord {
        SessionRecord {
            user_id: "u1".to_string(),
            role: "user".to_string(),
            wallet_address: Some("0xabc".to_string()),
            email: None,
            login_at: Utc::now(),
            safe_mode: true,
        }
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let sessions = SessionManager::new(Arc::new(MemoryKvCache::new()), Duration::from_secs(60));
        sessions.create(&record()).await.unwrap();
        let stored = sessions.get("u1").await.unwrap().unwrap();
        assert!(stored.safe_mode);
        assert_eq!(stored.wallet_address.as_deref(), Some("0xabc"));

        sessions.remove("u1").await.unwrap();
        assert!(sessions.get("u1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires_with_token() {
        let sessions = SessionManager::new(Arc::new(MemoryKvCache::new()), Duration::from_secs(60));
        sessions.create(&record()).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(sessions.get("u1").await.unwrap().is_none());
    }

    #[test]
    fn test_record_wire_shape() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["safeMode"], true);
        assert_eq!(json["walletAddress"], "0xabc");
        assert!(json.get("email").is_none());
    }
}
