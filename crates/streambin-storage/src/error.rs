use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Unknown storage driver: '{0}'")]
    UnknownDriver(String),

    #[error("Unknown compression codec: '{0}'")]
    UnknownCodec(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}
