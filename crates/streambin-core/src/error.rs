use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot parse offset range from filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid offset range [{from}, {to}]: from exceeds to")]
    InvalidRange { from: u64, to: u64 },
}
