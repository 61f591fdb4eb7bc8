pub mod accounting;
pub mod bins;
pub mod cache;
pub mod convert;
pub mod dedup;
pub mod error;
pub mod lock;
pub mod offsets;
pub mod orchestrator;
pub mod paths;
pub mod scan;
pub mod timer;
pub mod worker;

pub use accounting::Accountant;
pub use bins::Frequency;
pub use cache::{FileCache, FileCacheStore, WriteResponse};
pub use convert::{FormatRegistry, RecordConverter, RecordConverterFactory};
pub use error::{Error, Result};
pub use lock::{DirLockManager, RedisLockManager, RemoteLockManager, TopicLock};
pub use offsets::{FileOffsetStore, OffsetStore, PostponedWriter, RedisOffsetStore};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunStats, TopicSettings};
pub use paths::{RecordOrganization, RecordPathFactory, TimeBinFormat};
pub use scan::SourceScanner;
pub use timer::Timer;
pub use worker::{RestructureWorker, WorkerStats};
