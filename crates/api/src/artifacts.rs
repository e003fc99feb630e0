//! Local filesystem artifact store.
//!
//! Holds uploaded source files, pre-publish snapshots and applied diffs
//! under one root directory. Keys are relative paths; the key is also the
//! stable path recorded on the ledger row.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use linework_core::import_version::sanitize_file_name;
use linework_core::store::{ArtifactError, ArtifactStore};

/// Write-once store rooted at a directory.
pub struct LocalArtifactStore {
    root: PathBuf,
}

/// Key under which an upload named `file_name` is stored.
pub fn upload_key(file_name: &str) -> String {
    format!("uploads/{}/{}", Uuid::new_v4(), sanitize_file_name(file_name))
}

fn io_error(err: std::io::Error) -> ArtifactError {
    ArtifactError::Io(err.to_string())
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to its file, rejecting anything that could leave the root.
    pub fn resolve(&self, key: &str) -> Result<PathBuf, ArtifactError> {
        if key.is_empty() || key.contains('\\') {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ArtifactError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Delete a stored upload and its per-upload directory. Missing files
    /// are not an error.
    pub async fn remove(&self, key: &str) -> Result<(), ArtifactError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error(e)),
        }
        if let Some(parent) = path.parent() {
            if parent != self.root {
                // Only succeeds when empty.
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    /// Write to a unique temp file, fsync, then hard-link into place. The
    /// link fails if the key already exists, so nothing is ever overwritten
    /// and readers never see a partial file.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, ArtifactError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let temp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error(e));
        }

        let linked = fs::hard_link(&temp_path, &path).await;
        let _ = fs::remove_file(&temp_path).await;
        match linked {
            Ok(()) => Ok(key.to_string()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(ArtifactError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(io_error(e)),
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        let file = self.resolve(path)?;
        fs::read(&file).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ArtifactError::NotFound(path.to_string()),
            _ => io_error(e),
        })
    }
}
