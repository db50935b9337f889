//! A file-backed persistence bridge

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use super::CredentialPersistence;
use crate::{error::BoxError, Credential};

/// Persists credentials as JSON documents in a local directory
///
/// Each key maps to `<dir>/<key>.json`. Writes go to a temporary sibling file
/// that is renamed over the target, so a crash mid-write leaves the previous
/// credential intact. On Unix, files are only readable by their owner.
#[derive(Debug)]
pub struct FilePersistence {
    dir: PathBuf,
}

impl FilePersistence {
    /// Constructs a new file persistence rooted at `dir`
    ///
    /// The directory is created on first write if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding persisted credentials
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unusable credential key {key:?}"),
            ));
        }

        Ok(self.dir.join(format!("{key}.json")))
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp_path = path.with_extension(format!("json.tmp.{}", std::process::id()));

        let mut file_opts = OpenOptions::new();
        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, path).await
    }
}

#[async_trait]
impl CredentialPersistence for FilePersistence {
    async fn get(&self, key: &str) -> Result<Option<Credential>, BoxError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, credential: &Credential) -> Result<(), BoxError> {
        let path = self.path_for(key)?;
        let data = serde_json::to_vec_pretty(credential)?;
        self.write_atomic(&path, &data).await?;
        tracing::trace!(path = %path.display(), "persisted credential");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BoxError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::trace!(path = %path.display(), "removed persisted credential");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
