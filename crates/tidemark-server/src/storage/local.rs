use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use axum::body::Bytes;

use super::{DeleteOutcome, ImportStorage};

/// Stores uploads under a root directory on local disk.
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `location` under the root, refusing absolute paths and `..`.
    fn resolve(&self, location: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(location);
        if location.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid storage location");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImportStorage for LocalDiskStorage {
    async fn store(&self, location: &str, data: Bytes) -> anyhow::Result<()> {
        let path = self.resolve(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create import directory")?;
        }
        tokio::fs::write(&path, &data)
            .await
            .context("failed to write import file")?;
        tracing::debug!(location, bytes = data.len(), "Import file stored");
        Ok(())
    }

    async fn read_stream(&self, location: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        let path = self.resolve(location)?;
        let file = tokio::fs::File::open(&path)
            .await
            .context("failed to open import file")?
            .into_std()
            .await;
        Ok(Box::new(std::io::BufReader::new(file)))
    }

    async fn delete(&self, location: &str) -> DeleteOutcome {
        let path = match self.resolve(location) {
            Ok(path) => path,
            Err(e) => return DeleteOutcome::failed(e.to_string()),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => DeleteOutcome::ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DeleteOutcome::ok(),
            Err(e) => DeleteOutcome::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_read_delete_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalDiskStorage::new(dir.path());

        storage
            .store("site_a/imp_1.csv", Bytes::from_static(b"a,b\n1,2\n"))
            .await
            .expect("store");

        let mut contents = String::new();
        storage
            .read_stream("site_a/imp_1.csv")
            .await
            .expect("open")
            .read_to_string(&mut contents)
            .expect("read");
        assert_eq!(contents, "a,b\n1,2\n");

        assert!(storage.delete("site_a/imp_1.csv").await.success);
        assert!(storage.read_stream("site_a/imp_1.csv").await.is_err());
        // Deleting twice is not an error.
        assert!(storage.delete("site_a/imp_1.csv").await.success);
    }

    #[tokio::test]
    async fn rejects_locations_outside_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalDiskStorage::new(dir.path());

        assert!(storage
            .store("../escape.csv", Bytes::from_static(b"x"))
            .await
            .is_err());
        assert!(storage.read_stream("/etc/passwd").await.is_err());
        assert!(!storage.delete("a/../../b.csv").await.success);
    }
}
