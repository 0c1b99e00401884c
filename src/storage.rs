//! Raw-byte storage for uploaded documents.
//!
//! The pipeline never interprets a storage reference — it saves bytes at
//! ingest, reads them back inside the background task, and stores the ref on
//! the document row in between. Keeping the boundary behind a trait lets
//! tests substitute an in-memory store and keeps the door open for an object
//! store behind the same two calls.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::Doc2OrderError;

/// Opaque byte storage: save at upload, read back in the background task.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` and return an opaque reference to them.
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String, Doc2OrderError>;

    /// Read back the bytes behind a reference produced by [`save`](Self::save).
    async fn read(&self, storage_ref: &str) -> Result<Vec<u8>, Doc2OrderError>;
}

/// Filesystem-backed store: one file per upload under a root directory.
///
/// References are filenames made collision-resistant with a
/// millisecond-timestamp prefix; the original name is sanitised to its final
/// path component so an uploaded `../../etc/passwd` cannot escape the root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn path_for(&self, storage_ref: &str) -> PathBuf {
        self.root.join(storage_ref)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String, Doc2OrderError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Doc2OrderError::Storage {
                path: self.root.clone(),
                source: e,
            })?;

        let base = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "upload.bin".to_string());
        let storage_ref = format!("{}_{}", Utc::now().timestamp_millis(), base);

        let path = self.path_for(&storage_ref);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Doc2OrderError::Storage {
                path: path.clone(),
                source: e,
            })?;
        debug!(storage_ref, size = bytes.len(), "upload stored");
        Ok(storage_ref)
    }

    async fn read(&self, storage_ref: &str) -> Result<Vec<u8>, Doc2OrderError> {
        let path = self.path_for(storage_ref);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Doc2OrderError::Storage {
                path: path.clone(),
                source: e,
            })
    }
}
