//! Safe-mode query routing
//!
//! This crate provides:
//! - The primary store interface plus an in-process implementation
//! - The health monitor that decides whether a request runs in failover mode
//! - The query router (find / find-one / count / aggregate) over either store
//! - Aggregation pipeline parsing and failover folding
//! - The pagination envelope shared by both modes

pub mod health;
pub mod pagination;
pub mod pipeline;
pub mod primary;
pub mod router;

pub use health::{HealthMonitor, HealthStatus};
pub use pagination::{Page, Pagination, page_options, paginate};
pub use pipeline::{FoldedPipeline, Stage, fold, parse_pipeline, run_stages};
pub use primary::{ConnectionState, MemoryPrimaryStore, PrimaryError, PrimaryStore};
pub use router::{QueryContext, QueryRouter};
