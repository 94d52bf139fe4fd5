//! Primary store health monitor
//!
//! Answers "is the primary store usable right now?" for request middleware.
//! A probe never fails: every error degrades to unhealthy.

use crate::primary::{ConnectionState, PrimaryStore};
use safemode_common::config::HealthConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Connection state plus configured target, for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub state: ConnectionState,
    pub target: String,
}

pub struct HealthMonitor {
    primary: Arc<dyn PrimaryStore>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(primary: Arc<dyn PrimaryStore>, config: HealthConfig) -> Self {
        Self { primary, config }
    }

    /// Connection ready and a bounded ping succeeds
    pub async fn is_healthy(&self) -> bool {
        let state = self.primary.connection_state();
        if !state.is_ready() {
            debug!(state = %state, "primary store not connected");
            return false;
        }
        match tokio::time::timeout(self.config.ping_timeout(), self.primary.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "primary store ping failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.config.ping_timeout_ms, "primary store ping timed out");
                false
            }
        }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            state: self.primary.connection_state(),
            target: self.config.target.clone(),
        }
    }

    /// Poll until healthy or `timeout` elapses
    ///
    /// For startup and retry paths; request handling must use `is_healthy`.
    /// Each probe is cut short at the deadline.
    pub async fn wait_until_healthy(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Ok(true) = tokio::time::timeout(remaining, self.is_healthy()).await {
                info!(primary = %self.config.target, "primary store is healthy");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// `wait_until_healthy` with the configured poll interval
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.wait_until_healthy(timeout, self.config.wait_poll_interval())
            .await
    }
}
