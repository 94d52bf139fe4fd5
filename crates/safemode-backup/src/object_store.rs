//! Content-addressed object store client
//!
//! Only the download side is consumed here. Payloads may or may not be
//! gzip-compressed; callers detect that from the bytes themselves.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;

/// Errors reported by an object store client
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid content address: {0}")]
    InvalidAddress(String),
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Download side of a content-addressed object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, address: &str) -> Result<Bytes, ObjectStoreError>;
}

/// Content address of a payload (hex SHA-256)
pub fn content_address(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// In-memory object store keyed by content address
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload and return its content address
    pub fn put(&self, data: impl Into<Bytes>) -> String {
        let data = data.into();
        let address = content_address(&data);
        self.objects.write().insert(address.clone(), data);
        address
    }

    pub fn remove(&self, address: &str) {
        self.objects.write().remove(address);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, address: &str) -> Result<Bytes, ObjectStoreError> {
        self.objects
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(address.to_string()))
    }
}

/// Object store backed by a local directory, one file per content address
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, address: &str) -> Result<PathBuf, ObjectStoreError> {
        let valid = !address.is_empty()
            && address
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !address.starts_with('.');
        if !valid {
            return Err(ObjectStoreError::InvalidAddress(address.to_string()));
        }
        Ok(self.root.join(address))
    }

    /// Write a payload under its content address
    pub async fn put(&self, data: &[u8]) -> Result<String, ObjectStoreError> {
        let address = content_address(data);
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.path_for(&address)?, data).await?;
        Ok(address)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn download(&self, address: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.path_for(address)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(address.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
