pub mod compression;
pub mod driver;
pub mod error;
pub mod local;
pub mod object;
pub mod registry;

pub use compression::{CompressionCodec, CompressionRegistry};
pub use driver::{FileEntry, StorageDriver};
pub use error::{Error, Result};
pub use local::LocalStorageDriver;
pub use object::ObjectStorageDriver;
pub use registry::{StorageDriverFactory, StorageRegistry};
