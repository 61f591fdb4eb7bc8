//! Durable persistence of processed offset ranges.
//!
//! One offset range set is stored per topic, either as a per-topic CSV
//! file under the output tree or as a JSON envelope in a key-value store.
//! Reads degrade to an empty set on failure: the cost is re-processing,
//! never data loss on the target. Writes are postponed and coalesced by a
//! [`postponed::PostponedWriter`] owned by the accountant.

pub mod file;
pub mod postponed;
pub mod redis;

use async_trait::async_trait;
use streambin_core::OffsetRangeSet;

use crate::error::Result;

pub use self::file::FileOffsetStore;
pub use self::postponed::PostponedWriter;
pub use self::redis::RedisOffsetStore;

#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Load the stored set of a topic. Failures log a warning and return
    /// an empty set.
    async fn read(&self, topic: &str) -> OffsetRangeSet;

    /// Persist the full set of a topic, replacing the stored state.
    async fn write(&self, topic: &str, set: &OffsetRangeSet) -> Result<()>;
}
