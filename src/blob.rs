//! External blob-store interface.
//!
//! File-typed attribute values store only a content handle; bytes live in a
//! blob store behind this trait. [`FsBlobStore`] is the content-addressed
//! filesystem implementation used by tests and small deployments;
//! [`MemoryBlobStore`] backs unit tests.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Opaque content handle stored inside a serialized change value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHandle {
    /// Content address (hex sha-256 of the bytes).
    pub key: String,
    /// Original file name, kept for download headers.
    pub name: String,
    pub mime: String,
}

/// Content-addressed blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: &[u8], name: &str, mime: &str) -> StoreResult<BlobHandle>;
    async fn get(&self, handle: &BlobHandle) -> StoreResult<Vec<u8>>;
    /// Deleting an absent blob is a no-op.
    async fn delete(&self, handle: &BlobHandle) -> StoreResult<()>;
}

fn content_key(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Filesystem blob store, sharded by the first two hex digits of the key.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let shard = &key[..key.len().min(2)];
        self.root.join(shard).join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: &[u8], name: &str, mime: &str) -> StoreResult<BlobHandle> {
        let key = content_key(bytes);
        let path = self.path_for(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Content-addressed: identical bytes already on disk are reused.
        match tokio::fs::metadata(&path).await {
            Ok(_) => debug!(%key, "blob already present"),
            Err(_) => tokio::fs::write(&path, bytes).await?,
        }
        Ok(BlobHandle {
            key,
            name: name.to_string(),
            mime: mime.to_string(),
        })
    }

    async fn get(&self, handle: &BlobHandle) -> StoreResult<Vec<u8>> {
        match tokio::fs::read(self.path_for(&handle.key)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                what: "blob",
                id: handle.key.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, handle: &BlobHandle) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_for(&handle.key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        MemoryBlobStore::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8], name: &str, mime: &str) -> StoreResult<BlobHandle> {
        let key = content_key(bytes);
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .insert(key.clone(), bytes.to_vec());
        Ok(BlobHandle {
            key,
            name: name.to_string(),
            mime: mime.to_string(),
        })
    }

    async fn get(&self, handle: &BlobHandle) -> StoreResult<Vec<u8>> {
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .get(&handle.key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                what: "blob",
                id: handle.key.clone(),
            })
    }

    async fn delete(&self, handle: &BlobHandle) -> StoreResult<()> {
        self.blobs
            .lock()
            .expect("blob map poisoned")
            .remove(&handle.key);
        Ok(())
    }
}
