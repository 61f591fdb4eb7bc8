use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] streambin_core::Error),

    #[error(transparent)]
    Storage(#[from] streambin_storage::Error),

    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cannot map record: {0}")]
    RecordMapping(String),

    #[error("Unknown record format: '{0}'")]
    UnknownFormat(String),

    #[error("{failures} cache(s) failed, first error: {first}")]
    CacheFailures { failures: usize, first: String },
}
