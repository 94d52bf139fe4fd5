//! Primary document store client
//!
//! The normally-authoritative store. Only the query surface the router
//! needs is modelled here; the driver itself is an external collaborator.

use crate::pipeline::{Stage, run_stages};
use async_trait::async_trait;
use parking_lot::RwLock;
use safemode_common::{Category, Document, Error, Filter, QueryOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Primary store failure
#[derive(Debug, thiserror::Error)]
pub enum PrimaryError {
    #[error("not connected ({0})")]
    NotConnected(ConnectionState),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unsupported pipeline stage: {0}")]
    UnsupportedStage(String),
}

impl From<PrimaryError> for Error {
    fn from(e: PrimaryError) -> Self {
        match e {
            PrimaryError::NotConnected(_) => Self::PrimaryUnavailable(e.to_string()),
            PrimaryError::Query(_) | PrimaryError::UnsupportedStage(_) => Self::PrimaryQuery(e.to_string()),
        }
    }
}

/// Driver-reported connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Unknown,
}

impl ConnectionState {
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Query surface of the primary store
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Current connection state, without any I/O
    fn connection_state(&self) -> ConnectionState;

    /// Lightweight administrative liveness probe
    async fn ping(&self) -> Result<(), PrimaryError>;

    async fn find(
        &self,
        category: Category,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, PrimaryError>;

    async fn find_one(&self, category: Category, filter: &Filter) -> Result<Option<Document>, PrimaryError>;

    async fn count(&self, category: Category, filter: &Filter) -> Result<usize, PrimaryError>;

    /// Run a pipeline natively
    async fn aggregate(&self, category: Category, pipeline: &[Stage]) -> Result<Vec<Document>, PrimaryError>;
}

/// In-process primary store
///
/// Supports the same equality subset as the ephemeral stores. The connection
/// state and ping latency can be changed at runtime to simulate outages.
#[derive(Default)]
pub struct MemoryPrimaryStore {
    collections: RwLock<HashMap<Category, Vec<Document>>>,
    state: RwLock<Option<ConnectionState>>,
    ping_delay: RwLock<Option<Duration>>,
    ping_fails: AtomicBool,
}

impl MemoryPrimaryStore {
    /// Create a connected, empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, category: Category, doc: Document) {
        self.collections.write().entry(category).or_default().push(doc);
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = Some(state);
    }

    /// Make every ping take `delay` before answering
    pub fn set_ping_delay(&self, delay: Option<Duration>) {
        *self.ping_delay.write() = delay;
    }

    /// Make pings fail while the connection still reports ready
    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    fn check_connected(&self) -> Result<(), PrimaryError> {
        let state = self.connection_state();
        if state.is_ready() {
            Ok(())
        } else {
            Err(PrimaryError::NotConnected(state))
        }
    }

    fn matching(&self, category: Category, filter: &Filter) -> Vec<Document> {
        self.collections
            .read()
            .get(&category)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    fn connection_state(&self) -> ConnectionState {
        self.state.read().unwrap_or(ConnectionState::Connected)
    }

    async fn ping(&self) -> Result<(), PrimaryError> {
        let delay = *self.ping_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check_connected()?;
        if self.ping_fails.load(Ordering::SeqCst) {
            return Err(PrimaryError::Query("ping rejected".to_string()));
        }
        Ok(())
    }

    async fn find(
        &self,
        category: Category,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, PrimaryError> {
        self.check_connected()?;
        Ok(options.apply(self.matching(category, filter)))
    }

    async fn find_one(&self, category: Category, filter: &Filter) -> Result<Option<Document>, PrimaryError> {
        self.check_connected()?;
        Ok(self.matching(category, filter).into_iter().next())
    }

    async fn count(&self, category: Category, filter: &Filter) -> Result<usize, PrimaryError> {
        self.check_connected()?;
        Ok(self.matching(category, filter).len())
    }

    async fn aggregate(&self, category: Category, pipeline: &[Stage]) -> Result<Vec<Document>, PrimaryError> {
        self.check_connected()?;
        if let Some(Stage::Other(raw)) = pipeline.iter().find(|s| matches!(s, Stage::Other(_))) {
            return Err(PrimaryError::UnsupportedStage(raw.to_string()));
        }
        Ok(run_stages(self.matching(category, &Filter::new()), pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safemode_common::SortSpec;
    use serde_json::json;

    fn store() -> MemoryPrimaryStore {
        let store = MemoryPrimaryStore::new();
        for (id, status) in [("o1", "paid"), ("o2", "new"), ("o3", "paid")] {
            store.insert(
                Category::Orders,
                json!({"_id": id, "userId": "u1", "status": status}).as_object().cloned().unwrap(),
            );
        }
        store
    }

    #[tokio::test]
    async fn test_native_pipeline_runs_in_order() {
        let store = store();
        let pipeline = [
            Stage::Match(Filter::new().eq("status", "paid")),
            Stage::Sort(SortSpec::desc("_id")),
            Stage::Limit(1),
        ];
        let docs = store.aggregate(Category::Orders, &pipeline).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["_id"], "o3");
    }

    #[tokio::test]
    async fn test_disconnected_store_rejects_queries() {
        let store = store();
        store.set_state(ConnectionState::Disconnecting);
        let err = store.count(Category::Orders, &Filter::new()).await.unwrap_err();
        assert!(matches!(err, PrimaryError::NotConnected(ConnectionState::Disconnecting)));
        assert!(matches!(Error::from(err), Error::PrimaryUnavailable(_)));
    }
}
