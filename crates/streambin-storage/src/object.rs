use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;

use crate::driver::{FileEntry, StorageDriver};
use crate::error::Result;

/// Storage driver backed by an [`object_store::ObjectStore`].
///
/// Covers the `s3` and `azure` backends. Object stores have no real
/// directories, so `create_directories` is a no-op and listings synthesize
/// directory entries from common prefixes. A `store` publish is a single
/// `put`, which object stores apply atomically.
pub struct ObjectStorageDriver {
    name: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStorageDriver {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    fn object_path(path: &Path) -> ObjectPath {
        ObjectPath::from(path.to_string_lossy().trim_start_matches('/'))
    }

    fn to_path_buf(path: &ObjectPath) -> PathBuf {
        PathBuf::from(format!("/{}", path))
    }
}

#[async_trait]
impl StorageDriver for ObjectStorageDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, path: &Path) -> Result<Vec<FileEntry>> {
        let prefix = Self::object_path(path);
        let listing = self.store.list_with_delimiter(Some(&prefix)).await?;

        let mut entries: Vec<FileEntry> = listing
            .common_prefixes
            .iter()
            .map(|p| FileEntry {
                path: Self::to_path_buf(p),
                is_directory: true,
                size: 0,
            })
            .collect();
        entries.extend(listing.objects.iter().map(|meta| FileEntry {
            path: Self::to_path_buf(&meta.location),
            is_directory: false,
            size: meta.size as u64,
        }));
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn new_input(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let data = self
            .store
            .get(&Self::object_path(path))
            .await?
            .bytes()
            .await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn status(&self, path: &Path) -> Result<Option<u64>> {
        match self.store.head(&Self::object_path(path)).await {
            Ok(meta) => Ok(Some(meta.size as u64)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, local: &Path, target: &Path) -> Result<()> {
        let data = tokio::fs::read(local).await?;
        self.store
            .put(&Self::object_path(target), bytes::Bytes::from(data).into())
            .await?;
        tokio::fs::remove_file(local).await?;
        Ok(())
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        self.store
            .rename(&Self::object_path(from), &Self::object_path(to))
            .await?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.store.delete(&Self::object_path(path)).await?;
        Ok(())
    }

    async fn create_directories(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
