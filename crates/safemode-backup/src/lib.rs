//! Safe-mode backup access
//!
//! This crate provides:
//! - Collaborator clients: ledger backup records, content-addressed object
//!   store, fast key-value cache (traits plus in-process implementations)
//! - The backup locator (ledger first, cache shadow second)
//! - The backup extractor (format detection, per-user slicing)
//! - The result cache in front of the extractor
//!
//! # Example
//!
//! ```rust,ignore
//! use safemode_backup::{BackupExtractor, BackupLocator, ResultCache};
//! use std::sync::Arc;
//!
//! let locator = Arc::new(BackupLocator::new(ledger, kv.clone(), config.backup.clone()));
//! let extractor = Arc::new(BackupExtractor::new(locator, objects));
//! let cache = ResultCache::new(extractor, kv, config.cache.clone());
//! let bundle = cache.get_or_extract("u1", 50).await?;
//! ```

pub mod extractor;
pub mod kv;
pub mod ledger;
pub mod locator;
pub mod object_store;
pub mod result_cache;

pub use extractor::{BackupExtractor, BackupSource, BackupSummary};
pub use kv::{KvCache, KvError, MemoryKvCache};
pub use ledger::{BackupLedger, LedgerError, MemoryLedger};
pub use locator::BackupLocator;
pub use object_store::{FsObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreError, content_address};
pub use result_cache::{BundleProvider, ResultCache, ResultCacheStats};
