//! Best-effort mutual exclusion per topic across processes.
//!
//! Locks are advisory and non-blocking: acquisition either returns a
//! scoped handle or `None` when another process holds the topic. A lease
//! TTL with heartbeat refresh is the only recovery path for a crashed
//! holder. Reentrance is not required; sequential acquire/release cycles
//! by one process must both succeed.

pub mod dir;
pub mod redis;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;

pub use self::dir::DirLockManager;
pub use self::redis::RedisLockManager;

/// Minimum lease TTL; shorter configured values are clamped up.
pub const MIN_LOCK_TTL: std::time::Duration = std::time::Duration::from_secs(300);

#[async_trait]
pub trait RemoteLockManager: Send + Sync {
    /// Try to acquire the exclusive topic lock. Returns `None` without
    /// blocking when another process holds it.
    async fn acquire_topic_lock(&self, topic: &str) -> Result<Option<TopicLock>>;
}

/// Scoped lock handle. The heartbeat keeps the lease alive while the
/// handle exists; releasing (or dropping) stops the heartbeat and frees
/// the lease on all paths, including failure.
pub struct TopicLock {
    topic: String,
    heartbeat: Option<JoinHandle<()>>,
    releaser: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl TopicLock {
    pub fn new(
        topic: impl Into<String>,
        heartbeat: JoinHandle<()>,
        releaser: impl Future<Output = ()> + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            heartbeat: Some(heartbeat),
            releaser: Some(Box::pin(releaser)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn release(mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(releaser) = self.releaser.take() {
            releaser.await;
        }
        debug!(topic = %self.topic, "Released topic lock");
    }
}

impl Drop for TopicLock {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        // Dropped without an explicit release: free the lease in the
        // background, or let the TTL expire when no runtime is left.
        if let Some(releaser) = self.releaser.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(releaser);
            }
        }
    }
}
