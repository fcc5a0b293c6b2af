use super::{ObjectStore, StorageError, StoredObject};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Stores objects as flat files in one directory and serves them from
/// `{public_base_url}/files/{key}`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub async fn new(
        root: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            public_base_url: public_base_url.into(),
        })
    }

    /// Opens a stored object for streaming back to a client.
    pub async fn open(&self, key: &str) -> Result<fs::File, StorageError> {
        let path = self.key_to_path(key)?;
        fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_owned()),
            _ => e.into(),
        })
    }

    fn key_to_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains("..") || key.contains('/') || key.contains('\\') {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(key))
    }

    fn generate_key(file_name: &str) -> String {
        let id = Uuid::new_v4();
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()));

        match extension {
            Some(ext) => format!("{}.{}", id, ext.to_ascii_lowercase()),
            None => id.to_string(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/files/{}", self.public_base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    async fn store(
        &self,
        data: Bytes,
        file_name: &str,
        _mime_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let key = Self::generate_key(file_name);
        let path = self.key_to_path(&key)?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("failed to create {}: {}", path.display(), e))
        })?;
        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("failed to write {}: {}", path.display(), e))
        })?;
        file.sync_all().await?;

        tracing::info!(key = %key, size_bytes = data.len(), "stored object on local disk");

        Ok(StoredObject {
            url: self.url_for(&key),
            object_id: key,
        })
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
