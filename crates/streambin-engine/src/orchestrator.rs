use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use streambin_storage::{CompressionCodec, StorageDriver};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::accounting::Accountant;
use crate::cache::FileCacheStore;
use crate::convert::RecordConverterFactory;
use crate::error::Result;
use crate::lock::RemoteLockManager;
use crate::offsets::OffsetStore;
use crate::paths::RecordPathFactory;
use crate::scan::SourceScanner;
use crate::timer::Timer;
use crate::worker::{RestructureWorker, WorkerStats, DEFAULT_BATCH_SIZE};

/// Per-topic processing overrides from the configuration.
#[derive(Debug, Clone, Default)]
pub struct TopicSettings {
    pub exclude: bool,
    pub deduplicate: Option<bool>,
    pub deduplicate_fields: Vec<String>,
}

/// Engine-wide settings resolved from CLI and configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub num_threads: usize,
    pub cache_size: usize,
    pub max_files_per_topic: usize,
    pub exclude_topics: HashSet<String>,
    pub deduplicate: bool,
    pub batch_size: u64,
    pub topics: HashMap<String, TopicSettings>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            num_threads: 1,
            cache_size: 100,
            max_files_per_topic: 0,
            exclude_topics: HashSet::new(),
            deduplicate: false,
            batch_size: DEFAULT_BATCH_SIZE,
            topics: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub topics: u64,
    pub processed_files: u64,
    pub processed_records: u64,
}

/// Discovers topics and schedules one worker per topic under the remote
/// lock, with bounded parallelism on the runtime's work-stealing pool.
///
/// Workers share nothing but the durable offset store and the lock
/// backend; every other resource (accountant, cache pool, temp
/// directory) is built inside the topic task that owns it.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn StorageDriver>,
    target: Arc<dyn StorageDriver>,
    offset_store: Arc<dyn OffsetStore>,
    lock_manager: Arc<dyn RemoteLockManager>,
    converter_factory: Arc<dyn RecordConverterFactory>,
    codec: Arc<dyn CompressionCodec>,
    path_factory: Arc<RecordPathFactory>,
    output_root: PathBuf,
    tmp_root: PathBuf,
    timer: Arc<Timer>,
    settings: OrchestratorSettings,
    is_closed: Arc<AtomicBool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn StorageDriver>,
        target: Arc<dyn StorageDriver>,
        offset_store: Arc<dyn OffsetStore>,
        lock_manager: Arc<dyn RemoteLockManager>,
        converter_factory: Arc<dyn RecordConverterFactory>,
        codec: Arc<dyn CompressionCodec>,
        path_factory: Arc<RecordPathFactory>,
        output_root: PathBuf,
        tmp_root: PathBuf,
        timer: Arc<Timer>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                target,
                offset_store,
                lock_manager,
                converter_factory,
                codec,
                path_factory,
                output_root,
                tmp_root,
                timer,
                settings,
                is_closed: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Stop accepting new files; running workers drain at the next file
    /// boundary.
    pub fn close(&self) {
        self.inner.is_closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed.load(Ordering::Relaxed)
    }

    /// Process every topic found under `root`.
    pub async fn process(&self, root: &Path) -> Result<RunStats> {
        let scanner = SourceScanner::new(
            self.inner.source.clone(),
            self.inner.settings.max_files_per_topic,
        );
        let topic_dirs: Vec<PathBuf> = scanner
            .find_topic_paths(root)
            .await?
            .into_iter()
            .filter(|dir| !self.inner.is_excluded(dir))
            .collect();

        info!(root = %root.display(), topics = topic_dirs.len(), "Scanned topics");

        let parallelism = self.inner.settings.num_threads.max(1);
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut join_set = JoinSet::new();

        let processed_files = Arc::new(AtomicU64::new(0));
        let processed_records = Arc::new(AtomicU64::new(0));
        let processed_topics = Arc::new(AtomicU64::new(0));

        for topic_dir in topic_dirs {
            if self.is_closed() {
                break;
            }
            let inner = self.inner.clone();
            let semaphore = semaphore.clone();
            let files = processed_files.clone();
            let records = processed_records.clone();
            let topics = processed_topics.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if let Some(stats) = inner.process_topic(&topic_dir).await {
                    files.fetch_add(stats.processed_files, Ordering::Relaxed);
                    records.fetch_add(stats.processed_records, Ordering::Relaxed);
                    topics.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Topic task panicked");
            }
        }

        let stats = RunStats {
            topics: processed_topics.load(Ordering::Relaxed),
            processed_files: processed_files.load(Ordering::Relaxed),
            processed_records: processed_records.load(Ordering::Relaxed),
        };
        info!(
            topics = stats.topics,
            files = stats.processed_files,
            records = stats.processed_records,
            "Finished processing root"
        );
        if self.inner.timer.is_enabled() {
            info!("{}", self.inner.timer);
        }
        Ok(stats)
    }
}

impl Inner {
    fn is_excluded(&self, topic_dir: &Path) -> bool {
        let topic = topic_name(topic_dir);
        self.settings.exclude_topics.contains(&topic)
            || self
                .settings
                .topics
                .get(&topic)
                .map(|t| t.exclude)
                .unwrap_or(false)
    }

    fn dedup_fields(&self, topic: &str) -> Option<Vec<String>> {
        let overrides = self.settings.topics.get(topic);
        let enabled = overrides
            .and_then(|t| t.deduplicate)
            .unwrap_or(self.settings.deduplicate);
        if !enabled {
            return None;
        }
        Some(
            overrides
                .map(|t| t.deduplicate_fields.clone())
                .unwrap_or_default(),
        )
    }

    /// Run one topic under its lock. Returns `None` when the topic was
    /// skipped (lock contention).
    async fn process_topic(self: &Arc<Self>, topic_dir: &Path) -> Option<WorkerStats> {
        let topic = topic_name(topic_dir);

        let lock = match self.lock_manager.acquire_topic_lock(&topic).await {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!(topic = %topic, "Topic locked by another process, skipping");
                return None;
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to acquire topic lock, skipping");
                return None;
            }
        };

        let result = self.run_worker(&topic, topic_dir).await;
        lock.release().await;

        match result {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to process topic");
                Some(WorkerStats::default())
            }
        }
    }

    async fn run_worker(self: &Arc<Self>, topic: &str, topic_dir: &Path) -> Result<WorkerStats> {
        let accountant = Arc::new(
            Accountant::new(
                self.offset_store.clone(),
                self.target.clone(),
                &self.output_root,
                topic,
                &self.tmp_root,
            )
            .await?,
        );

        let scanner = SourceScanner::new(self.source.clone(), self.settings.max_files_per_topic);
        let mut files = scanner
            .topic_files(topic, topic_dir, &accountant.offsets())
            .await?;
        if files.is_empty() {
            debug!(topic = %topic, "No new files");
            accountant.close().await?;
            return Ok(WorkerStats::default());
        }
        files.sort_largest_first();
        info!(
            topic = %topic,
            files = files.num_files(),
            records = files.num_offsets(),
            "Processing topic"
        );

        let cache_store = FileCacheStore::new(
            self.target.clone(),
            self.converter_factory.clone(),
            self.codec.clone(),
            accountant.clone(),
            self.settings.cache_size,
            self.dedup_fields(topic),
        )?;

        let worker = RestructureWorker::new(
            topic,
            self.source.clone(),
            self.target.clone(),
            cache_store,
            accountant.clone(),
            self.path_factory.clone(),
            self.timer.clone(),
            self.is_closed.clone(),
            self.settings.batch_size,
        );

        let result = worker.process(files).await;
        let close_result = accountant.close().await;
        let stats = result?;
        close_result?;
        Ok(stats)
    }
}

fn topic_name(topic_dir: &Path) -> String {
    topic_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::CsvConverterFactory;
    use crate::lock::DirLockManager;
    use crate::offsets::FileOffsetStore;
    use apache_avro::types::Value;
    use apache_avro::Schema;
    use std::time::Duration;
    use streambin_core::TopicPartition;
    use streambin_storage::compression::IdentityCompression;
    use streambin_storage::LocalStorageDriver;

    const SCHEMA_JSON: &str = r#"{
        "type": "record", "name": "Envelope", "fields": [
            {"name": "key", "type": {"type": "record", "name": "Key", "fields": [
                {"name": "projectId", "type": ["null", "string"], "default": null},
                {"name": "userId", "type": "string"},
                {"name": "sourceId", "type": "string"}
            ]}},
            {"name": "value", "type": {"type": "record", "name": "Val", "fields": [
                {"name": "time", "type": "double"},
                {"name": "a", "type": "string"}
            ]}}
        ]
    }"#;

    fn envelope(user: &str, a: &str) -> Value {
        Value::Record(vec![
            (
                "key".to_string(),
                Value::Record(vec![
                    (
                        "projectId".to_string(),
                        Value::Union(1, Box::new(Value::String("p".to_string()))),
                    ),
                    ("userId".to_string(), Value::String(user.to_string())),
                    ("sourceId".to_string(), Value::String("s".to_string())),
                ]),
            ),
            (
                "value".to_string(),
                Value::Record(vec![
                    ("time".to_string(), Value::Double(1_493_711_175.0)),
                    ("a".to_string(), Value::String(a.to_string())),
                ]),
            ),
        ])
    }

    fn write_container(path: &Path, records: &[Value]) {
        let schema = Schema::parse_str(SCHEMA_JSON).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut writer = apache_avro::Writer::new(&schema, Vec::new());
        for record in records {
            writer.append(record.clone()).unwrap();
        }
        std::fs::write(path, writer.into_inner().unwrap()).unwrap();
    }

    fn orchestrator(root: &Path, settings: OrchestratorSettings) -> Orchestrator {
        let driver: Arc<dyn StorageDriver> = Arc::new(LocalStorageDriver::new());
        let out = root.join("out");
        let tmp = root.join("tmp");
        std::fs::create_dir_all(&tmp).unwrap();
        Orchestrator::new(
            driver.clone(),
            driver.clone(),
            Arc::new(FileOffsetStore::new(driver.clone(), &out, &tmp)),
            Arc::new(DirLockManager::new(
                root.join("locks"),
                Duration::from_secs(600),
            )),
            Arc::new(CsvConverterFactory),
            Arc::new(IdentityCompression),
            Arc::new(RecordPathFactory::new(&out, ".csv")),
            out,
            tmp,
            Arc::new(Timer::disabled()),
            settings,
        )
    }

    #[tokio::test]
    async fn test_empty_root_completes_with_zero_counts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        std::fs::create_dir_all(&root).unwrap();

        let orch = orchestrator(dir.path(), OrchestratorSettings::default());
        let stats = orch.process(&root).await.unwrap();
        assert_eq!(stats, RunStats::default());
        assert!(!dir.path().join("out/offsets").exists());
    }

    #[tokio::test]
    async fn test_processes_multiple_topics() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        write_container(
            &root.join("t1/2017/t1+0+0+1.avro"),
            &[envelope("u1", "a"), envelope("u1", "b")],
        );
        write_container(&root.join("t2/2017/t2+0+0+0.avro"), &[envelope("u2", "c")]);

        let settings = OrchestratorSettings {
            num_threads: 4,
            ..OrchestratorSettings::default()
        };
        let orch = orchestrator(dir.path(), settings);
        let stats = orch.process(&root).await.unwrap();

        assert_eq!(stats.topics, 2);
        assert_eq!(stats.processed_files, 2);
        assert_eq!(stats.processed_records, 3);
        assert!(dir.path().join("out/p/u1/t1/20170502_0700.csv").exists());
        assert!(dir.path().join("out/p/u2/t2/20170502_0700.csv").exists());
        assert!(dir.path().join("out/offsets/t1.csv").exists());
        assert!(dir.path().join("out/offsets/t2.csv").exists());
        assert!(dir.path().join("out/bins.csv").exists());

        // Locks were released.
        assert_eq!(std::fs::read_dir(dir.path().join("locks")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        write_container(&root.join("t1/2017/t1+0+0+1.avro"), &[
            envelope("u1", "a"),
            envelope("u1", "b"),
        ]);

        let orch = orchestrator(dir.path(), OrchestratorSettings::default());
        let first = orch.process(&root).await.unwrap();
        assert_eq!(first.processed_records, 2);

        let out = dir.path().join("out/p/u1/t1/20170502_0700.csv");
        let first_content = std::fs::read_to_string(&out).unwrap();

        let orch = orchestrator(dir.path(), OrchestratorSettings::default());
        let second = orch.process(&root).await.unwrap();
        // The file's range is committed, so nothing is even re-read.
        assert_eq!(second.processed_records, 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), first_content);
    }

    #[tokio::test]
    async fn test_excluded_topics_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        write_container(&root.join("skipme/2017/skipme+0+0+0.avro"), &[envelope("u", "x")]);
        write_container(&root.join("keep/2017/keep+0+0+0.avro"), &[envelope("u", "y")]);

        let settings = OrchestratorSettings {
            exclude_topics: HashSet::from(["skipme".to_string()]),
            ..OrchestratorSettings::default()
        };
        let orch = orchestrator(dir.path(), settings);
        let stats = orch.process(&root).await.unwrap();
        assert_eq!(stats.topics, 1);
        assert!(!dir.path().join("out/p/u/skipme").exists());
    }

    #[tokio::test]
    async fn test_topic_override_exclude() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        write_container(&root.join("t/2017/t+0+0+0.avro"), &[envelope("u", "x")]);

        let settings = OrchestratorSettings {
            topics: HashMap::from([(
                "t".to_string(),
                TopicSettings {
                    exclude: true,
                    ..TopicSettings::default()
                },
            )]),
            ..OrchestratorSettings::default()
        };
        let orch = orchestrator(dir.path(), settings);
        let stats = orch.process(&root).await.unwrap();
        assert_eq!(stats.topics, 0);
    }

    #[tokio::test]
    async fn test_held_lock_skips_topic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        write_container(&root.join("t/2017/t+0+0+0.avro"), &[envelope("u", "x")]);

        // Another process holds the topic.
        let lock_manager =
            DirLockManager::new(dir.path().join("locks"), Duration::from_secs(600));
        let held = lock_manager.acquire_topic_lock("t").await.unwrap().unwrap();

        let orch = orchestrator(dir.path(), OrchestratorSettings::default());
        let stats = orch.process(&root).await.unwrap();
        assert_eq!(stats.topics, 0);
        assert_eq!(stats.processed_records, 0);

        held.release().await;

        // Offsets untouched, so a later run picks the topic up.
        let orch = orchestrator(dir.path(), OrchestratorSettings::default());
        let stats = orch.process(&root).await.unwrap();
        assert_eq!(stats.processed_records, 1);
    }

    #[tokio::test]
    async fn test_closed_orchestrator_schedules_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        write_container(&root.join("t/2017/t+0+0+0.avro"), &[envelope("u", "x")]);

        let orch = orchestrator(dir.path(), OrchestratorSettings::default());
        orch.close();
        let stats = orch.process(&root).await.unwrap();
        assert_eq!(stats, RunStats::default());
    }

    #[tokio::test]
    async fn test_deduplicate_topic_setting() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("in");
        write_container(
            &root.join("t/2017/t+0+0+2.avro"),
            &[envelope("u", "dup"), envelope("u", "dup"), envelope("u", "dup")],
        );

        let settings = OrchestratorSettings {
            deduplicate: true,
            ..OrchestratorSettings::default()
        };
        let orch = orchestrator(dir.path(), settings);
        orch.process(&root).await.unwrap();

        let out = dir.path().join("out/p/u/t/20170502_0700.csv");
        let content = std::fs::read_to_string(&out).unwrap();
        // Header plus a single deduplicated row.
        assert_eq!(content.lines().count(), 2);
    }
}
