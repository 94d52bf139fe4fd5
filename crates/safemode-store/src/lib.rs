//! Safe-mode ephemeral stores
//!
//! This crate provides:
//! - An indexed in-memory document collection (unique identifier index
//!   plus multikey secondary indices)
//! - The per-user store built from an extracted backup bundle
//! - The store manager: single-flight creation, idle sweep, stats

pub mod collection;
pub mod manager;
pub mod user_store;

pub use collection::{Collection, CollectionError};
pub use manager::{EphemeralStoreManager, StoreStats, UserStoreStats};
pub use user_store::UserStore;
