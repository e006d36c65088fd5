use rand::RngCore;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Storage Adapter (C4): allocates unique filenames, writes bytes, deletes on
/// rollback. Mirrors the source's cloud storage trait but targets a flat
/// directory on the local filesystem rather than an object store, since the
/// spec's on-disk layout (§6) has no concept of buckets or prefixes.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Write `content` under a freshly generated name and return the stored
    /// filename (with `suggested_ext` suffix) and its absolute path.
    async fn write(
        &self,
        content: &[u8],
        suggested_ext: &str,
    ) -> Result<(String, PathBuf), StorageError>;

    async fn delete(&self, absolute_path: &Path) -> Result<(), StorageError>;
}

/// Production storage implementation: a flat directory of `<128-bit hex>.<ext>`
/// files, created on first use.
#[derive(Debug, Clone)]
pub struct LocalFsStorage {
    upload_folder: PathBuf,
}

impl LocalFsStorage {
    pub async fn new(upload_folder: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let upload_folder = upload_folder.into();
        fs::create_dir_all(&upload_folder).await?;
        Ok(Self { upload_folder })
    }

    /// 128-bit random token rendered as lowercase hex, per §4.4. Collisions
    /// are astronomically unlikely for any plausible deployment, so no
    /// existence check is performed before the write.
    fn generate_token() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

#[async_trait::async_trait]
impl Storage for LocalFsStorage {
    async fn write(
        &self,
        content: &[u8],
        suggested_ext: &str,
    ) -> Result<(String, PathBuf), StorageError> {
        let stored_filename = format!("{}.{}", Self::generate_token(), suggested_ext);
        let absolute_path = self.upload_folder.join(&stored_filename);

        // Write to a sibling temp file and rename into place so a write
        // failure never leaves a partial file at `absolute_path` (§4.4).
        let tmp_path = self
            .upload_folder
            .join(format!("{}.tmp", stored_filename));
        fs::write(&tmp_path, content).await.map_err(|e| {
            StorageError::Io(e)
        })?;
        if let Err(e) = fs::rename(&tmp_path, &absolute_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok((stored_filename, absolute_path))
    }

    async fn delete(&self, absolute_path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(absolute_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_back_roundtrips_content() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path()).await.unwrap();

        let (stored_filename, path) = storage.write(b"a,b\n1,2\n", "csv").await.unwrap();

        assert!(stored_filename.ends_with(".csv"));
        assert_eq!(fs::read(&path).await.unwrap(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn two_writes_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path()).await.unwrap();

        let (a, _) = storage.write(b"x", "csv").await.unwrap();
        let (b, _) = storage.write(b"y", "csv").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn delete_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFsStorage::new(dir.path()).await.unwrap();

        let (_, path) = storage.write(b"x", "csv").await.unwrap();
        storage.delete(&path).await.unwrap();
        assert!(!path.exists());
        // Deleting again (e.g. a best-effort rollback after a later failure)
        // must not error.
        storage.delete(&path).await.unwrap();
    }
}
