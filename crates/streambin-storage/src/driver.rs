use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// One listing entry of a storage driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub is_directory: bool,
    pub size: u64,
}

/// Uniform interface over the stores records are read from and written to.
///
/// Built-in implementations cover the local filesystem and
/// `object_store`-backed buckets (S3-compatible, Azure blobs); anything
/// else plugs in through the [`crate::registry::StorageRegistry`].
///
/// `store` is the publish operation: it must move a finished local file
/// into its final location with atomic semantics where the backend offers
/// them (rename on a local filesystem, single put on an object store),
/// falling back to a non-atomic copy only when unavoidable.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Short name this driver registers under, e.g. `local` or `s3`.
    fn name(&self) -> &str;

    /// List the direct children of a directory.
    async fn list(&self, path: &Path) -> Result<Vec<FileEntry>>;

    /// Open a readable stream over a stored file.
    async fn new_input(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    /// Size of a stored file, or `None` when it does not exist.
    async fn status(&self, path: &Path) -> Result<Option<u64>>;

    /// Publish a local file to its target location.
    async fn store(&self, local: &Path, target: &Path) -> Result<()>;

    /// Move a stored file to a new location.
    async fn move_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a stored file.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Create a directory and its missing parents. A no-op on stores
    /// without real directories.
    async fn create_directories(&self, path: &Path) -> Result<()>;
}

impl std::fmt::Debug for dyn StorageDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageDriver").field("name", &self.name()).finish()
    }
}
