use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use streambin_engine::convert::FormatRegistry;
use streambin_engine::lock::{DirLockManager, RedisLockManager, RemoteLockManager};
use streambin_engine::offsets::{FileOffsetStore, OffsetStore, RedisOffsetStore};
use streambin_engine::orchestrator::{Orchestrator, OrchestratorSettings, RunStats};
use streambin_engine::paths::{RecordPathFactory, TimeBinFormat};
use streambin_engine::timer::Timer;
use streambin_engine::worker::DEFAULT_BATCH_SIZE;
use streambin_storage::{CompressionRegistry, StorageRegistry};
use tracing::{error, info};

use crate::config::Settings;

/// Assembles the engine from resolved settings. The registries are
/// public so custom storage drivers, codecs or record formats can
/// register before `build` resolves names from the configuration.
pub struct AppBuilder {
    pub storage: StorageRegistry,
    pub compression: CompressionRegistry,
    pub formats: FormatRegistry,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            storage: StorageRegistry::new(),
            compression: CompressionRegistry::new(),
            formats: FormatRegistry::new(),
        }
    }

    pub fn build(self, settings: Settings) -> Result<App> {
        let source = self
            .storage
            .create(&settings.source.store_type, &settings.source.properties)
            .context("cannot create source storage driver")?;
        let target = self
            .storage
            .create(&settings.target.store_type, &settings.target.properties)
            .context("cannot create target storage driver")?;

        let codec = self
            .compression
            .get(&settings.compression)
            .context("cannot resolve compression")?;
        let converter_factory = self
            .formats
            .get(&settings.format)
            .context("cannot resolve record format")?;

        let extension = format!("{}{}", converter_factory.extension(), codec.extension());
        let bin_format =
            TimeBinFormat::from_name(&settings.bin_format).context("cannot resolve time bin")?;
        let path_factory = Arc::new(
            RecordPathFactory::new(settings.output_directory.clone(), extension)
                .with_bin_format(bin_format),
        );

        let (tmp_root, tmp_guard) = match &settings.tmp_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create tmp dir {}", dir.display()))?;
                (dir.clone(), None)
            }
            None => {
                let guard = tempfile::Builder::new()
                    .prefix("streambin-")
                    .tempdir()
                    .context("cannot create tmp dir")?;
                (guard.path().to_path_buf(), Some(guard))
            }
        };

        let redis_client = settings
            .redis
            .as_ref()
            .map(|redis| {
                redis::Client::open(redis.url.as_str())
                    .with_context(|| format!("cannot open redis at {}", redis.url))
            })
            .transpose()?;

        let lock_manager: Arc<dyn RemoteLockManager> = match (&settings.redis, &redis_client) {
            (Some(redis), Some(client)) => Arc::new(RedisLockManager::new(
                client.clone(),
                redis.prefix.clone(),
                Duration::from_secs(redis.lock_ttl_seconds),
            )),
            _ => {
                let lock_dir = settings
                    .lock_directory
                    .clone()
                    .unwrap_or_else(|| settings.output_directory.join(".locks"));
                Arc::new(DirLockManager::new(lock_dir, Duration::from_secs(600)))
            }
        };

        let offset_store: Arc<dyn OffsetStore> = match (&settings.redis, &redis_client) {
            (Some(redis), Some(client)) if redis.offsets => {
                Arc::new(RedisOffsetStore::new(client.clone(), redis.prefix.clone()))
            }
            _ => Arc::new(FileOffsetStore::new(
                target.clone(),
                &settings.output_directory,
                &tmp_root,
            )),
        };

        let timer = Arc::new(Timer::new(settings.timer));

        let orchestrator_settings = OrchestratorSettings {
            num_threads: settings.num_threads,
            cache_size: settings.cache_size,
            max_files_per_topic: settings.max_files_per_topic,
            exclude_topics: settings.exclude_topics.clone(),
            deduplicate: settings.deduplicate,
            batch_size: settings.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            topics: settings.topics.clone(),
        };

        info!(
            format = %settings.format,
            compression = %settings.compression,
            output = %settings.output_directory.display(),
            "Writing output"
        );

        let orchestrator = Orchestrator::new(
            source,
            target,
            offset_store,
            lock_manager,
            converter_factory,
            codec,
            path_factory,
            settings.output_directory.clone(),
            tmp_root,
            timer,
            orchestrator_settings,
        );

        Ok(App {
            orchestrator,
            inputs: settings.inputs,
            service_interval: settings.service.then(|| Duration::from_secs(settings.interval)),
            _tmp_guard: tmp_guard,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    orchestrator: Orchestrator,
    inputs: Vec<PathBuf>,
    service_interval: Option<Duration>,
    _tmp_guard: Option<tempfile::TempDir>,
}

impl App {
    /// Run once, or on a fixed cadence in service mode. Ctrl-C stops
    /// accepting new files and drains running workers before returning.
    pub async fn run(&self) -> Result<RunStats> {
        match self.service_interval {
            None => self.run_once().await,
            Some(interval) => self.run_service(interval).await,
        }
    }

    async fn run_once(&self) -> Result<RunStats> {
        let mut run = std::pin::pin!(self.process_inputs());
        let mut interrupted = false;
        loop {
            tokio::select! {
                result = &mut run => return result,
                signal = tokio::signal::ctrl_c(), if !interrupted => {
                    signal.context("cannot listen for interrupt")?;
                    info!("Interrupted, draining running workers");
                    interrupted = true;
                    self.orchestrator.close();
                }
            }
        }
    }

    async fn run_service(&self, interval: Duration) -> Result<RunStats> {
        let mut totals = RunStats::default();
        loop {
            let stats = self.run_once().await?;
            totals.topics += stats.topics;
            totals.processed_files += stats.processed_files;
            totals.processed_records += stats.processed_records;

            if self.orchestrator.is_closed() {
                return Ok(totals);
            }

            info!(seconds = interval.as_secs(), "Waiting for next scan");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("cannot listen for interrupt")?;
                    self.orchestrator.close();
                    return Ok(totals);
                }
            }
        }
    }

    async fn process_inputs(&self) -> Result<RunStats> {
        let mut totals = RunStats::default();
        for input in &self.inputs {
            info!(input = %input.display(), "Processing input path");
            match self.orchestrator.process(input).await {
                Ok(stats) => {
                    totals.topics += stats.topics;
                    totals.processed_files += stats.processed_files;
                    totals.processed_records += stats.processed_records;
                }
                Err(e) => {
                    error!(input = %input.display(), error = %e, "Processing failed");
                    return Err(e.into());
                }
            }
            if self.orchestrator.is_closed() {
                break;
            }
        }
        Ok(totals)
    }
}
