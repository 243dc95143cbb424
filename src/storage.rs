use crate::error::StorageError;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

const IMAGE_PREFIX: &str = "images";

/// Writes uploaded bytes and hands back an opaque locator for them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, stored_filename: &str, bytes: Vec<u8>) -> Result<String, StorageError>;
    /// Removing a blob that is already gone succeeds.
    async fn remove(&self, storage_locator: &str) -> Result<(), StorageError>;
}

/// Turns a locator into a retrieval URL. Must be pure: same locator, same URL.
pub trait StorageResolver: Send + Sync {
    fn resolve_url(&self, storage_locator: &str) -> String;
}

/// Blob storage backed by a local directory, served under a public base URL.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, locator: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(locator);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidLocator(locator.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalStorage {
    async fn put(&self, stored_filename: &str, bytes: Vec<u8>) -> Result<String, StorageError> {
        let locator = format!("{}/{}", IMAGE_PREFIX, stored_filename);
        let path = self.path_for(&locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        log::trace!("Writing {} bytes to {:?}", bytes.len(), path);
        tokio::fs::write(&path, bytes).await?;
        log::debug!("Stored blob at locator: {}", locator);
        Ok(locator)
    }

    async fn remove(&self, storage_locator: &str) -> Result<(), StorageError> {
        let path = self.path_for(storage_locator)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::debug!("Removed blob at locator: {}", storage_locator);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StorageResolver for LocalStorage {
    fn resolve_url(&self, storage_locator: &str) -> String {
        format!(
            "{}/{}",
            self.public_base_url,
            storage_locator.trim_start_matches('/')
        )
    }
}
