use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use apache_avro::types::Value;
use rand::Rng;
use streambin_core::{Bin, TopicFile, TopicFileList, TopicPartition, Transaction};
use streambin_storage::StorageDriver;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::accounting::Accountant;
use crate::cache::FileCacheStore;
use crate::error::{Error, Result};
use crate::paths::RecordPathFactory;
use crate::timer::Timer;

/// Offsets to process between cache flushes.
pub const DEFAULT_BATCH_SIZE: u64 = 500_000;

/// Bound on suffix retries for one record; past this something is wrong
/// with the target directory itself.
const MAX_WRITE_ATTEMPTS: u32 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed_files: u64,
    pub processed_records: u64,
}

enum FileOutcome {
    Processed,
    Skipped,
}

/// Per-topic pipeline: reads source container files in order, skips
/// offsets the accountant already covers, routes each record through the
/// path factory into the cache store, and commits each file's offset
/// range once its last record is written.
///
/// Flushes are batched: every ≈500k offsets, with a ±25% jitter drawn per
/// worker so concurrent workers do not flush in lockstep.
pub struct RestructureWorker {
    topic: String,
    source: Arc<dyn StorageDriver>,
    target: Arc<dyn StorageDriver>,
    cache_store: FileCacheStore,
    accountant: Arc<Accountant>,
    path_factory: Arc<RecordPathFactory>,
    timer: Arc<Timer>,
    is_closed: Arc<AtomicBool>,
    batch_size: u64,
    schema_dirs: HashSet<PathBuf>,
}

impl RestructureWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: impl Into<String>,
        source: Arc<dyn StorageDriver>,
        target: Arc<dyn StorageDriver>,
        cache_store: FileCacheStore,
        accountant: Arc<Accountant>,
        path_factory: Arc<RecordPathFactory>,
        timer: Arc<Timer>,
        is_closed: Arc<AtomicBool>,
        batch_size: u64,
    ) -> Self {
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        Self {
            topic: topic.into(),
            source,
            target,
            cache_store,
            accountant,
            path_factory,
            timer,
            is_closed,
            batch_size: (batch_size as f64 * jitter).round() as u64,
            schema_dirs: HashSet::new(),
        }
    }

    /// Process the topic's files until exhausted or the orchestrator
    /// closes. The cache store is closed and published on every path.
    pub async fn process(mut self, files: TopicFileList) -> Result<WorkerStats> {
        let result = self.run(files).await;
        let close_result = self.cache_store.close().await;
        let stats = result?;
        close_result?;
        Ok(stats)
    }

    async fn run(&mut self, files: TopicFileList) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();
        let mut current_size = 0u64;

        for file in &files.files {
            if self.is_closed.load(Ordering::Relaxed) {
                debug!(topic = %self.topic, "Worker stopping, orchestrator closed");
                break;
            }

            match self.process_file(file, &mut stats).await {
                Ok(FileOutcome::Processed) => {
                    // A crash after this point will not re-process the file.
                    self.accountant.commit_range(&file.range);
                }
                Ok(FileOutcome::Skipped) => {}
                // Mapping problems skip the file; the next one may be fine.
                Err(Error::RecordMapping(msg)) => {
                    error!(topic = %self.topic, path = %file.path.display(), error = %msg, "Cannot map values");
                }
                Err(Error::Avro(e)) => {
                    error!(topic = %self.topic, path = %file.path.display(), error = %e, "Cannot read container file");
                }
                Err(e) => return Err(e),
            }
            stats.processed_files += 1;

            current_size += file.size();
            if current_size >= self.batch_size {
                current_size = 0;
                self.cache_store.flush()?;
            }
        }

        Ok(stats)
    }

    async fn process_file(
        &mut self,
        file: &TopicFile,
        stats: &mut WorkerStats,
    ) -> Result<FileOutcome> {
        debug!(path = %file.path.display(), "Reading");

        // Zero-length files stall the container reader, a known upstream
        // defect.
        if self.source.status(&file.path).await? == Some(0) {
            warn!(path = %file.path.display(), "File has zero length, skipping");
            return Ok(FileOutcome::Skipped);
        }

        let mut read_start = Instant::now();
        let input = self.source.new_input(&file.path).await?;
        let reader = apache_avro::Reader::new(input)?;
        let schema = reader.writer_schema().clone();

        let tp = file.range.topic_partition.clone();
        let mut offset = file.range.offset_from;
        for value in reader {
            let record = value?;
            self.timer.add("read", &self.topic, read_start);

            let account_start = Instant::now();
            let already_seen = self.accountant.contains_offset(&tp, offset);
            self.timer.add("accounting", &self.topic, account_start);

            if !already_seen {
                self.write_record(&tp, &record, &schema, offset).await?;
            }
            stats.processed_records += 1;
            offset += 1;
            read_start = Instant::now();
        }

        Ok(FileOutcome::Processed)
    }

    /// Route one record to a compatible target file, suffixing the path
    /// until one accepts it.
    async fn write_record(
        &mut self,
        tp: &TopicPartition,
        record: &Value,
        schema: &apache_avro::Schema,
        offset: u64,
    ) -> Result<()> {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            let metadata = self.path_factory.organize(&self.topic, record, attempt)?;
            let bin = Bin::new(
                &self.topic,
                &metadata.category,
                self.path_factory.time_bin(metadata.time),
            );
            let transaction = Transaction::new(tp.clone(), offset);

            let write_start = Instant::now();
            let response = self
                .cache_store
                .write_record(&metadata.path, record, &transaction, bin)
                .await?;
            self.timer.add("write", &self.topic, write_start);

            if response.is_successful() {
                self.write_schema_once(&metadata.path, schema).await;
                return Ok(());
            }
        }
        Err(Error::RecordMapping(format!(
            "no compatible target file found for offset {offset} after {MAX_WRITE_ATTEMPTS} attempts"
        )))
    }

    /// Emit `schema.json` beside the first successful write into each
    /// target directory. Best effort: a failure here never fails the
    /// record.
    async fn write_schema_once(&mut self, record_path: &PathBuf, schema: &apache_avro::Schema) {
        let Some(dir) = record_path.parent() else {
            return;
        };
        if self.schema_dirs.contains(dir) {
            return;
        }
        self.schema_dirs.insert(dir.to_path_buf());

        let schema_path = dir.join("schema.json");
        let result = async {
            if self.target.status(&schema_path).await?.is_some() {
                return Ok(());
            }
            let tmp = self
                .accountant
                .tmp_dir()
                .join(format!("schema-{}.json", Uuid::new_v4()));
            std::fs::write(&tmp, serde_json::to_string_pretty(schema)?)?;
            self.target.store(&tmp, &schema_path).await?;
            Ok::<(), Error>(())
        }
        .await;
        if let Err(e) = result {
            warn!(path = %schema_path.display(), error = %e, "Failed to write schema file");
        }
    }
}
