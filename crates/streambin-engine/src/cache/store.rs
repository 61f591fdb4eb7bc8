use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use apache_avro::types::Value;
use streambin_core::{Bin, Transaction};
use streambin_storage::{CompressionCodec, StorageDriver};
use tracing::{error, warn};
use uuid::Uuid;

use super::file_cache::FileCache;
use crate::accounting::Accountant;
use crate::convert::RecordConverterFactory;
use crate::error::{Error, Result};

/// Outcome of a write through the cache store: whether the target's
/// writer was already cached, and whether the row was written. All four
/// combinations occur; `!successful` tells the worker to retry against a
/// suffixed sibling path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResponse {
    /// Cache hit and the write succeeded.
    CacheAndWrite,
    /// Cache hit but the record does not match the pinned schema.
    CacheAndNoWrite,
    /// Cache miss, a writer was opened, and the write succeeded.
    NoCacheAndWrite,
    /// Cache miss and the write failed or the writer could not open.
    NoCacheAndNoWrite,
}

impl WriteResponse {
    fn of(cache_hit: bool, successful: bool) -> Self {
        match (cache_hit, successful) {
            (true, true) => WriteResponse::CacheAndWrite,
            (true, false) => WriteResponse::CacheAndNoWrite,
            (false, true) => WriteResponse::NoCacheAndWrite,
            (false, false) => WriteResponse::NoCacheAndNoWrite,
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            WriteResponse::CacheAndWrite | WriteResponse::NoCacheAndWrite
        )
    }

    pub fn is_cache_hit(&self) -> bool {
        matches!(
            self,
            WriteResponse::CacheAndWrite | WriteResponse::CacheAndNoWrite
        )
    }
}

/// Bounded pool of open file caches, keyed by target path.
///
/// When the pool is full, the half of the caches used longest ago is
/// closed and published in one sweep; bulk eviction amortizes publish
/// cost and avoids churn when many paths share similar last-use times.
/// The pool, its temp directory and its accountant belong to exactly one
/// worker.
pub struct FileCacheStore {
    driver: Arc<dyn StorageDriver>,
    converter_factory: Arc<dyn RecordConverterFactory>,
    codec: Arc<dyn CompressionCodec>,
    accountant: Arc<Accountant>,
    max_files: usize,
    caches: HashMap<PathBuf, FileCache>,
    tmp_dir: PathBuf,
    dedup_fields: Option<Vec<String>>,
}

impl FileCacheStore {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        converter_factory: Arc<dyn RecordConverterFactory>,
        codec: Arc<dyn CompressionCodec>,
        accountant: Arc<Accountant>,
        max_files: usize,
        dedup_fields: Option<Vec<String>>,
    ) -> Result<Self> {
        let tmp_dir = accountant.tmp_dir().join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&tmp_dir)?;
        Ok(Self {
            driver,
            converter_factory,
            codec,
            accountant,
            max_files: max_files.max(1),
            caches: HashMap::new(),
            tmp_dir,
            dedup_fields,
        })
    }

    /// Append a record to the given target file, opening and caching a
    /// writer when none is open yet.
    pub async fn write_record(
        &mut self,
        path: &Path,
        record: &Value,
        transaction: &Transaction,
        bin: Bin,
    ) -> Result<WriteResponse> {
        let cache_hit = self.caches.contains_key(path);
        if !cache_hit {
            self.ensure_capacity().await?;

            if let Some(parent) = path.parent() {
                self.driver.create_directories(parent).await?;
            }
            let cache = match FileCache::new(
                self.driver.clone(),
                self.converter_factory.as_ref(),
                self.codec.clone(),
                path.to_path_buf(),
                record,
                &self.tmp_dir,
                self.accountant.clone(),
                self.dedup_fields.clone(),
            )
            .await
            {
                Ok(cache) => cache,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Could not open cache");
                    return Ok(WriteResponse::NoCacheAndNoWrite);
                }
            };
            self.caches.insert(path.to_path_buf(), cache);
        }

        let Some(cache) = self.caches.get_mut(path) else {
            return Ok(WriteResponse::NoCacheAndNoWrite);
        };
        match cache.write_record(transaction, bin, record) {
            Ok(written) => Ok(WriteResponse::of(cache_hit, written)),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write record, closing cache");
                if let Some(cache) = self.caches.remove(path) {
                    // Already marked errored; close drops the temp file.
                    if let Err(close_err) = cache.close().await {
                        warn!(path = %path.display(), error = %close_err, "Failed to close errored cache");
                    }
                }
                Ok(WriteResponse::NoCacheAndNoWrite)
            }
        }
    }

    /// Make room for one more cache: when the pool is at capacity, close
    /// the half used longest ago.
    async fn ensure_capacity(&mut self) -> Result<()> {
        if self.caches.len() < self.max_files {
            return Ok(());
        }

        let mut order: Vec<(Option<Instant>, PathBuf)> = self
            .caches
            .iter()
            .map(|(path, cache)| (cache.last_use(), path.clone()))
            .collect();
        order.sort();

        for (_, path) in order.into_iter().take(self.caches.len() / 2) {
            if let Some(cache) = self.caches.remove(&path) {
                cache.close().await?;
            }
        }
        Ok(())
    }

    /// Flush every cache and persist their ledgers. A failing cache does
    /// not skip the others; failures aggregate into one error.
    pub fn flush(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        for (path, cache) in self.caches.iter_mut() {
            if let Err(e) = cache.flush() {
                error!(path = %path.display(), error = %e, "Failed to flush cache");
                failures.push(e.to_string());
            }
        }
        aggregate(failures)
    }

    /// Close and publish every cache, then remove the temp directory.
    pub async fn close(mut self) -> Result<()> {
        let mut failures = Vec::new();
        for (path, cache) in self.caches.drain() {
            if let Err(e) = cache.close().await {
                error!(path = %path.display(), error = %e, "Failed to close cache");
                failures.push(e.to_string());
            }
        }

        if let Err(e) = std::fs::remove_dir_all(&self.tmp_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.tmp_dir.display(), error = %e, "Failed to remove temporary directory");
            }
        }
        aggregate(failures)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

fn aggregate(mut failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    Err(Error::CacheFailures {
        failures: failures.len(),
        first: failures.remove(0),
    })
}
