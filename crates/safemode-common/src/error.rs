//! Error types for the safe-mode failover layer
//!
//! This module defines the error taxonomy shared by the locator, extractor,
//! ephemeral store, query router and failover login.

use thiserror::Error;

/// Common result type for safe-mode operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for safe-mode operations
#[derive(Debug, Error)]
pub enum Error {
    // Recovery errors
    #[error("no backup available: neither the ledger nor the cache holds a full backup pointer")]
    NoBackupAvailable,

    #[error("backup download failed for {address}: {reason}")]
    DownloadFailed { address: String, reason: String },

    #[error("backup decode failed: {0}")]
    DecodeFailed(String),

    #[error("malformed backup record at line {line}: {reason}")]
    RecordParseError { line: usize, reason: String },

    // Login errors
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token error: {0}")]
    Token(String),

    // Query errors
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("primary store unavailable: {0}")]
    PrimaryUnavailable(String),

    #[error("primary store query failed: {0}")]
    PrimaryQuery(String),

    // Collaborator errors
    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("cache error: {0}")]
    Cache(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeFailed(msg.into())
    }

    /// Create a download error for a content address
    pub fn download(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DownloadFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Check if the caller may reasonably retry later
    ///
    /// Nothing in this crate retries internally; this only classifies.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoBackupAvailable
                | Self::DownloadFailed { .. }
                | Self::PrimaryUnavailable(_)
                | Self::Ledger(_)
                | Self::Cache(_)
        )
    }

    /// Check if this error came out of the recovery path (locate, download, decode)
    #[must_use]
    pub const fn is_recovery_failure(&self) -> bool {
        matches!(
            self,
            Self::NoBackupAvailable | Self::DownloadFailed { .. } | Self::DecodeFailed(_)
        )
    }

    /// Message safe to show to an end user
    ///
    /// Login failures never reveal whether the account exists.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid credentials",
            Self::NoBackupAvailable => "Service is recovering, please try again later",
            Self::DownloadFailed { .. }
            | Self::DecodeFailed(_)
            | Self::RecordParseError { .. }
            | Self::PrimaryUnavailable(_)
            | Self::Ledger(_)
            | Self::Cache(_) => "Data temporarily unavailable",
            Self::UnknownCollection(_) => "Unsupported request",
            _ => "Internal error",
        }
    }

    /// Get HTTP status code for the request layer
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::UnknownCollection(_) => 400,

            // 401 Unauthorized
            Self::InvalidCredentials | Self::Token(_) => 401,

            // 503 Service Unavailable
            Self::NoBackupAvailable
            | Self::DownloadFailed { .. }
            | Self::DecodeFailed(_)
            | Self::RecordParseError { .. }
            | Self::PrimaryUnavailable(_)
            | Self::Ledger(_)
            | Self::Cache(_) => 503,

            // 500 Internal Server Error
            Self::PrimaryQuery(_)
            | Self::Configuration(_)
            | Self::Serialization(_)
            | Self::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
