//! Blob storage for normalized photos.
//!
//! Two interchangeable backends implement [`BlobStore`]:
//! - [`S3BlobStore`] puts objects straight into a bucket from memory
//! - [`DriveBlobStore`] stages each photo in a scratch file and uploads it
//!   into a shared drive folder

mod drive;
mod s3;

pub use drive::DriveBlobStore;
pub use s3::S3BlobStore;

use crate::config::{StorageBackend, StorageConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors raised by a blob store. The underlying cause is kept in the message
/// so it can be shown to the contributor verbatim.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object store rejected {key}: {message}")]
    ObjectStore { key: String, message: String },

    #[error("drive rejected {name}: {message}")]
    Drive { name: String, message: String },

    #[error("scratch file error: {0}")]
    ScratchFile(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Destination for normalized photos
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `bytes` under `name`. Returns once the backend acknowledged the write.
    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Short backend label for logs and readiness output
    fn backend(&self) -> &'static str;
}

/// Build the configured blob store
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackend::ObjectStore => {
            let s3 = config.s3.as_ref().context("storage.s3 section missing")?;
            let store = S3BlobStore::new(s3)
                .await
                .context("Failed to initialize S3 blob store")?;
            Ok(Arc::new(store))
        }
        StorageBackend::FileSync => {
            let drive = config.drive.as_ref().context("storage.drive section missing")?;
            let store = DriveBlobStore::new(drive).context("Failed to initialize drive blob store")?;
            Ok(Arc::new(store))
        }
    }
}

/// Get content type from a stored name's extension
pub(crate) fn get_content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match ext.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Holds every `store` call until [`GatedStore::release`] hands out a permit
    pub struct GatedStore {
        gate: Semaphore,
        stored: Mutex<Vec<String>>,
    }

    impl GatedStore {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                stored: Mutex::default(),
            })
        }

        /// Let `n` more uploads complete
        pub fn release(&self, n: usize) {
            self.gate.add_permits(n);
        }

        pub fn stored(&self) -> Vec<String> {
            self.stored.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BlobStore for GatedStore {
        async fn store(&self, name: &str, _bytes: Vec<u8>) -> Result<(), StorageError> {
            let permit = self.gate.acquire().await.map_err(|e| StorageError::ObjectStore {
                key: name.to_string(),
                message: e.to_string(),
            })?;
            permit.forget();
            self.stored.lock().unwrap().push(name.to_string());
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "gated"
        }
    }
}
