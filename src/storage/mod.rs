//! Object storage for the uploaded bytes.
//!
//! The rest of the service only sees [`ObjectStore`]: it hands over the bytes
//! and keeps the returned URL and object id on the file record.

pub mod cloudinary;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use cloudinary::CloudinaryStorage;
pub use local::LocalStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Stable URL the file can be downloaded from.
    pub url: String,
    /// Provider-side identifier of the object.
    pub object_id: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads `data` and waits for the provider to acknowledge it. No retries.
    async fn store(
        &self,
        data: Bytes,
        file_name: &str,
        mime_type: &str,
    ) -> Result<StoredObject, StorageError>;

    fn backend_name(&self) -> &'static str;
}
