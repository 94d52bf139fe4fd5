//! Safe-mode common - shared types and utilities
//!
//! This crate provides the error taxonomy, configuration, backup and bundle
//! types, and the equality query DSL used across the failover layer.

pub mod config;
pub mod error;
pub mod query;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use query::{Filter, QueryOptions, SortOrder, SortSpec};
pub use types::*;
