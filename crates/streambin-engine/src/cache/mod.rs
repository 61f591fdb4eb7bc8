pub mod file_cache;
pub mod store;

pub use file_cache::FileCache;
pub use store::{FileCacheStore, WriteResponse};
