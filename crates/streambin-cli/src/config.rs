use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use streambin_engine::orchestrator::TopicSettings;

/// Restructure topic container files into a project/user/topic tree.
#[derive(Debug, Parser)]
#[command(name = "streambin", version, about)]
pub struct Cli {
    /// Input paths to scan for topic data
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Nameservice identifier for an HDFS source
    #[arg(short = 'n', long = "nameservice")]
    pub nameservice: Option<String>,

    /// Output directory
    #[arg(short = 'o', long = "output-directory")]
    pub output_directory: PathBuf,

    /// Output record format
    #[arg(short = 'f', long = "format", default_value = "csv")]
    pub format: String,

    /// Output compression
    #[arg(short = 'c', long = "compression", default_value = "none")]
    pub compression: String,

    /// Remove duplicate rows from output files
    #[arg(short = 'd', long = "deduplicate")]
    pub deduplicate: bool,

    /// Number of parallel topic workers
    #[arg(short = 't', long = "num-threads", default_value_t = 1)]
    pub num_threads: usize,

    /// Maximum number of open output writers per worker
    #[arg(short = 's', long = "cache-size", default_value_t = 100)]
    pub cache_size: usize,

    /// Maximum record files to process per topic per run (0 = unbounded)
    #[arg(long = "max-files-per-topic", default_value_t = 0)]
    pub max_files_per_topic: usize,

    /// Topic to exclude; may be given multiple times
    #[arg(long = "exclude-topic")]
    pub exclude_topics: Vec<String>,

    /// Keep running, re-scanning the inputs at a fixed interval
    #[arg(short = 'S', long = "service")]
    pub service: bool,

    /// Seconds between service-mode scans
    #[arg(short = 'i', long = "interval", default_value_t = 3600)]
    pub interval: u64,

    /// Directory for temporary files
    #[arg(long = "tmp-dir")]
    pub tmp_dir: Option<PathBuf>,

    /// Directory for topic lock files
    #[arg(long = "lock-directory")]
    pub lock_directory: Option<PathBuf>,

    /// YAML configuration file; its values override the flags above
    #[arg(short = 'F', long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// Print timing statistics after each run
    #[arg(long = "timer")]
    pub timer: bool,
}

/// YAML configuration file. Every section is optional; present values
/// override the command line.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub service: Option<ServiceConfig>,
    #[serde(default)]
    pub compression: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub paths: Option<PathsConfig>,
    #[serde(default)]
    pub topics: Option<HashMap<String, TopicConfig>>,
    #[serde(default)]
    pub source: Option<StoreConfig>,
    #[serde(default)]
    pub target: Option<StoreConfig>,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default)]
    pub num_threads: Option<usize>,
    #[serde(default)]
    pub cache_size: Option<usize>,
    #[serde(default)]
    pub max_files_per_topic: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<u64>,
    #[serde(default)]
    pub deduplicate: Option<bool>,
    #[serde(default)]
    pub timer: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(default)]
    pub inputs: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
    #[serde(default)]
    pub bin_format: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopicConfig {
    #[serde(default)]
    pub exclude: bool,
    #[serde(default)]
    pub deduplicate: Option<bool>,
    #[serde(default)]
    pub deduplicate_fields: Vec<String>,
}

/// A storage backend: driver name plus its type-specific properties.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub store_type: String,
    #[serde(flatten)]
    pub properties: HashMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: "local".to_string(),
            properties: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_seconds: u64,
    /// Keep offsets in redis instead of per-topic files.
    #[serde(default)]
    pub offsets: bool,
}

fn default_redis_prefix() -> String {
    "streambin".to_string()
}

fn default_lock_ttl() -> u64 {
    600
}

/// Fully resolved settings: the command line with the configuration file
/// applied on top.
#[derive(Debug)]
pub struct Settings {
    pub inputs: Vec<PathBuf>,
    pub output_directory: PathBuf,
    pub format: String,
    pub compression: String,
    pub bin_format: String,
    pub deduplicate: bool,
    pub num_threads: usize,
    pub cache_size: usize,
    pub max_files_per_topic: usize,
    pub batch_size: Option<u64>,
    pub exclude_topics: HashSet<String>,
    pub topics: HashMap<String, TopicSettings>,
    pub service: bool,
    pub interval: u64,
    pub timer: bool,
    pub tmp_dir: Option<PathBuf>,
    pub lock_directory: Option<PathBuf>,
    pub source: StoreConfig,
    pub target: StoreConfig,
    pub redis: Option<RedisConfig>,
}

impl Settings {
    pub fn resolve(cli: Cli) -> Result<Self> {
        let file = match &cli.config_file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config file {}", path.display()))?;
                serde_yaml::from_str::<ConfigFile>(&raw)
                    .with_context(|| format!("cannot parse config file {}", path.display()))?
            }
            None => ConfigFile::default(),
        };

        let mut source = file.source.unwrap_or_default();
        if let Some(nameservice) = &cli.nameservice {
            source
                .properties
                .insert("nameservice".to_string(), nameservice.clone());
        }

        let worker = file.worker.unwrap_or_default();
        let paths = file.paths.unwrap_or_default();
        let service = file.service.unwrap_or_default();

        let topics = file
            .topics
            .unwrap_or_default()
            .into_iter()
            .map(|(name, topic)| {
                (
                    name,
                    TopicSettings {
                        exclude: topic.exclude,
                        deduplicate: topic.deduplicate,
                        deduplicate_fields: topic.deduplicate_fields,
                    },
                )
            })
            .collect();

        let settings = Self {
            inputs: paths.inputs.unwrap_or(cli.inputs),
            output_directory: paths.output.unwrap_or(cli.output_directory),
            format: file.format.unwrap_or(cli.format),
            compression: file.compression.unwrap_or(cli.compression),
            bin_format: paths.bin_format.unwrap_or_else(|| "hourly".to_string()),
            deduplicate: worker.deduplicate.unwrap_or(cli.deduplicate),
            num_threads: worker.num_threads.unwrap_or(cli.num_threads),
            cache_size: worker.cache_size.unwrap_or(cli.cache_size),
            max_files_per_topic: worker.max_files_per_topic.unwrap_or(cli.max_files_per_topic),
            batch_size: worker.batch_size,
            exclude_topics: cli.exclude_topics.into_iter().collect(),
            topics,
            service: service.enable || cli.service,
            interval: service.interval.unwrap_or(cli.interval),
            timer: worker.timer.unwrap_or(cli.timer),
            tmp_dir: paths.tmp_dir.or(cli.tmp_dir),
            lock_directory: paths.lock_dir.or(cli.lock_directory),
            source,
            target: file.target.unwrap_or_default(),
            redis: file.redis,
        };

        if settings.inputs.is_empty() {
            bail!("at least one input path is required");
        }
        if settings.num_threads == 0 {
            bail!("--num-threads must be positive");
        }
        if settings.cache_size == 0 {
            bail!("--cache-size must be positive");
        }
        if settings.service && settings.interval == 0 {
            bail!("--interval must be positive in service mode");
        }
        Ok(settings)
    }
}
