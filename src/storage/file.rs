// src/storage/file.rs

// One file per key under a directory; the desktop default for the offline dataset.
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::debug;

use crate::error::{GuardError, Result, StorageError};
use crate::storage::StorageBackend;
use crate::storage_op;

#[derive(Debug, Clone)]
pub struct FileStorage {
    directory: PathBuf,
}

impl FileStorage {
    /// Creates the directory if needed
    pub async fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await.map_err(io_error)?;
        debug!(directory = %directory.display(), "File storage ready");
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(GuardError::Storage(StorageError::Io(format!(
                "invalid storage key '{}'",
                key
            ))));
        }
        Ok(self.directory.join(format!("{}.json", key)))
    }
}

fn io_error(err: std::io::Error) -> GuardError {
    GuardError::Storage(StorageError::Io(err.to_string()))
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let start = Instant::now();
        let path = self.path_for(key)?;

        // Write to a sibling temp file and rename so readers never see a torn document
        let tmp = self
            .directory
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));
        let result = async {
            fs::write(&tmp, value).await.map_err(io_error)?;
            fs::rename(&tmp, &path).await.map_err(io_error)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        storage_op!("set", key, result, start.elapsed().as_millis() as u64);
        result
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        fs::try_exists(&path).await.map_err(io_error)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(e)),
        }
    }
}
