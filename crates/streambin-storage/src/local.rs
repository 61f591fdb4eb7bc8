use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::driver::{FileEntry, StorageDriver};
use crate::error::Result;

/// Storage driver over the local filesystem.
///
/// Publishes are a plain `rename`, which is atomic within one filesystem;
/// when the temp directory lives on another device the rename fails and a
/// copy-then-delete fallback is used instead.
#[derive(Debug, Default)]
pub struct LocalStorageDriver;

impl LocalStorageDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StorageDriver for LocalStorageDriver {
    fn name(&self) -> &str {
        "local"
    }

    async fn list(&self, path: &Path) -> Result<Vec<FileEntry>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            entries.push(FileEntry {
                path: entry.path(),
                is_directory: meta.is_dir(),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn new_input(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(path)?;
        Ok(Box::new(file))
    }

    async fn status(&self, path: &Path) -> Result<Option<u64>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, local: &Path, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::rename(local, target).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Rename across devices fails; copy and remove instead.
                debug!(error = %e, "Rename failed, falling back to copy");
                tokio::fs::copy(local, target).await?;
                tokio::fs::remove_file(local).await?;
                Ok(())
            }
        }
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        self.store(from, to).await
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn create_directories(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_status_missing_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalStorageDriver::new();

        let path = dir.path().join("f.txt");
        assert_eq!(driver.status(&path).await.unwrap(), None);

        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(driver.status(&path).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_list_marks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalStorageDriver::new();

        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let entries = driver.list(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        let sub = entries.iter().find(|e| e.path.ends_with("sub")).unwrap();
        assert!(sub.is_directory);
        let file = entries.iter().find(|e| e.path.ends_with("a.txt")).unwrap();
        assert!(!file.is_directory);
        assert_eq!(file.size, 1);
    }

    #[tokio::test]
    async fn test_store_moves_file_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalStorageDriver::new();

        let local = dir.path().join("tmp-file");
        std::fs::write(&local, b"payload").unwrap();

        let target = dir.path().join("deep/nested/target.csv");
        driver.store(&local, &target).await.unwrap();

        assert!(!local.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_store_overwrites_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalStorageDriver::new();

        let target = dir.path().join("out.csv");
        std::fs::write(&target, b"old").unwrap();

        let local = dir.path().join("tmp");
        std::fs::write(&local, b"new").unwrap();
        driver.store(&local, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_new_input_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalStorageDriver::new();

        let path = dir.path().join("data");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"roundtrip").unwrap();
        drop(f);

        let mut reader = driver.new_input(&path).await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "roundtrip");
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let driver = LocalStorageDriver::new();

        let path = dir.path().join("gone");
        std::fs::write(&path, b"x").unwrap();
        driver.delete(&path).await.unwrap();
        assert!(!path.exists());
    }
}
