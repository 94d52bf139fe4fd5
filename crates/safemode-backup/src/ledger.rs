//! Ledger backup record store
//!
//! The ledger is append-only: pointers are never removed, only soft-deleted
//! by flipping their status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use safemode_common::{BackupPointer, BackupStatus, BackupType};
use std::sync::atomic::{AtomicBool, Ordering};

/// Errors reported by a ledger client
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("ledger rejected the request: {0}")]
    Rejected(String),
}

/// Backup record interface of the permissioned ledger
#[async_trait]
pub trait BackupLedger: Send + Sync {
    /// Append a new backup pointer
    async fn log_backup(
        &self,
        backup_id: &str,
        backup_type: BackupType,
        content_address: &str,
        timestamp: DateTime<Utc>,
        parent_backup_id: Option<&str>,
    ) -> Result<(), LedgerError>;

    /// Newest active full backup
    async fn latest_full_backup(&self) -> Result<Option<BackupPointer>, LedgerError>;

    /// Active incremental backups descending from `parent_id`, oldest first
    async fn incremental_chain(&self, parent_id: &str) -> Result<Vec<BackupPointer>, LedgerError>;

    /// Look up a pointer by id, whatever its status
    async fn backup_by_id(&self, backup_id: &str) -> Result<Option<BackupPointer>, LedgerError>;
}

/// In-process ledger
///
/// Backs the CLI and tests; can be switched offline to simulate a partition.
pub struct MemoryLedger {
    records: RwLock<Vec<BackupPointer>>,
    available: AtomicBool,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability; while offline every call fails with `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Soft-delete a pointer
    pub fn mark_deleted(&self, backup_id: &str) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.backup_id == backup_id)
            .ok_or_else(|| LedgerError::Rejected(format!("unknown backup {backup_id}")))?;
        record.status = BackupStatus::Deleted;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::Unavailable("peer unreachable".to_string()))
        }
    }
}

#[async_trait]
impl BackupLedger for MemoryLedger {
    async fn log_backup(
        &self,
        backup_id: &str,
        backup_type: BackupType,
        content_address: &str,
        timestamp: DateTime<Utc>,
        parent_backup_id: Option<&str>,
    ) -> Result<(), LedgerError> {
        self.check_available()?;
        let mut records = self.records.write();
        if records.iter().any(|r| r.backup_id == backup_id) {
            return Err(LedgerError::Rejected(format!(
                "backup {backup_id} already logged"
            )));
        }
        records.push(BackupPointer {
            backup_id: backup_id.to_string(),
            backup_type,
            content_address: content_address.to_string(),
            parent_backup_id: parent_backup_id.map(str::to_string),
            created_at: timestamp,
            status: BackupStatus::Active,
        });
        Ok(())
    }

    async fn latest_full_backup(&self) -> Result<Option<BackupPointer>, LedgerError> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.is_active_full())
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn incremental_chain(&self, parent_id: &str) -> Result<Vec<BackupPointer>, LedgerError> {
        self.check_available()?;
        let records = self.records.read();
        let mut chain: Vec<BackupPointer> = Vec::new();
        let mut frontier = vec![parent_id.to_string()];
        while let Some(parent) = frontier.pop() {
            for record in records.iter().filter(|r| {
                r.backup_type == BackupType::Incremental
                    && r.status == BackupStatus::Active
                    && r.parent_backup_id.as_deref() == Some(parent.as_str())
            }) {
                if !chain.iter().any(|c| c.backup_id == record.backup_id) {
                    frontier.push(record.backup_id.clone());
                    chain.push(record.clone());
                }
            }
        }
        chain.sort_by_key(|r| r.created_at);
        Ok(chain)
    }

    async fn backup_by_id(&self, backup_id: &str) -> Result<Option<BackupPointer>, LedgerError> {
        self.check_available()?;
        Ok(self
            .records
            .read()
            .iter()
            .find(|r| r.backup_id == backup_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_latest_full_skips_deleted() {
        let ledger = MemoryLedger::new();
        let t0 = Utc::now();
        ledger
            .log_backup("b1", BackupType::Full, "addr1", t0, None)
            .await
            .unwrap();
        ledger
            .log_backup("b2", BackupType::Full, "addr2", t0 + Duration::hours(1), None)
            .await
            .unwrap();
        ledger
            .log_backup("i1", BackupType::Incremental, "addr3", t0 + Duration::hours(2), Some("b2"))
            .await
            .unwrap();

        let latest = ledger.latest_full_backup().await.unwrap().unwrap();
        assert_eq!(latest.backup_id, "b2");

        ledger.mark_deleted("b2").unwrap();
        let latest = ledger.latest_full_backup().await.unwrap().unwrap();
        assert_eq!(latest.backup_id, "b1");

        // soft delete keeps the record
        let deleted = ledger.backup_by_id("b2").await.unwrap().unwrap();
        assert_eq!(deleted.status, BackupStatus::Deleted);
        assert_eq!(ledger.len(), 3);
    }

    #[tokio::test]
    async fn test_incremental_chain_is_chronological() {
        let ledger = MemoryLedger::new();
        let t0 = Utc::now();
        ledger
            .log_backup("full", BackupType::Full, "a0", t0, None)
            .await
            .unwrap();
        ledger
            .log_backup("inc2", BackupType::Incremental, "a2", t0 + Duration::hours(2), Some("inc1"))
            .await
            .unwrap();
        ledger
            .log_backup("inc1", BackupType::Incremental, "a1", t0 + Duration::hours(1), Some("full"))
            .await
            .unwrap();

        let chain = ledger.incremental_chain("full").await.unwrap();
        let ids: Vec<&str> = chain.iter().map(|p| p.backup_id.as_str()).collect();
        assert_eq!(ids, vec!["inc1", "inc2"]);
    }

    #[tokio::test]
    async fn test_offline_ledger_fails() {
        let ledger = MemoryLedger::new();
        ledger.set_available(false);
        assert!(matches!(
            ledger.latest_full_backup().await,
            Err(LedgerError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_backup_id_rejected() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        ledger
            .log_backup("b1", BackupType::Full, "a", now, None)
            .await
            .unwrap();
        let result = ledger.log_backup("b1", BackupType::Full, "b", now, None).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
    }
}
