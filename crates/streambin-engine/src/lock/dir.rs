use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{RemoteLockManager, TopicLock, MIN_LOCK_TTL};
use crate::error::Result;

/// Topic lock manager on a shared lock directory.
///
/// Each topic maps to `<dir>/<topic>.lock`, created with `create_new` so
/// exactly one process wins the race. The heartbeat rewrites the file at a
/// third of the TTL to keep its mtime fresh; a lock file whose mtime is
/// older than the TTL is considered abandoned and broken.
pub struct DirLockManager {
    dir: PathBuf,
    ttl: Duration,
}

impl DirLockManager {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::with_ttl(dir, ttl.max(MIN_LOCK_TTL))
    }

    fn with_ttl(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    fn lock_path(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{topic}.lock"))
    }

    fn try_create(path: &Path, token: &str) -> std::io::Result<bool> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(token.as_bytes())?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn is_stale(&self, path: &Path) -> bool {
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age > self.ttl)
                .unwrap_or(false),
            // Vanished between the failed create and now; retry the create.
            Err(_) => true,
        }
    }
}

#[async_trait::async_trait]
impl RemoteLockManager for DirLockManager {
    async fn acquire_topic_lock(&self, topic: &str) -> Result<Option<TopicLock>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.lock_path(topic);
        let token = Uuid::new_v4().to_string();

        let mut acquired = Self::try_create(&path, &token)?;
        if !acquired && self.is_stale(&path) {
            warn!(path = %path.display(), "Breaking stale topic lock");
            let _ = std::fs::remove_file(&path);
            acquired = Self::try_create(&path, &token)?;
        }
        if !acquired {
            return Ok(None);
        }
        debug!(topic = %topic, path = %path.display(), "Acquired topic lock");

        let heartbeat = {
            let path = path.clone();
            let token = token.clone();
            let interval = self.ttl / 3;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    match std::fs::read_to_string(&path) {
                        Ok(content) if content == token => {
                            if let Err(e) = std::fs::write(&path, &token) {
                                warn!(path = %path.display(), error = %e, "Failed to refresh topic lock");
                            }
                        }
                        _ => {
                            warn!(path = %path.display(), "Topic lock lost its lease");
                            return;
                        }
                    }
                }
            })
        };

        let releaser = {
            let path = path.clone();
            async move {
                match std::fs::read_to_string(&path) {
                    Ok(content) if content == token => {
                        if let Err(e) = std::fs::remove_file(&path) {
                            warn!(path = %path.display(), error = %e, "Failed to remove topic lock");
                        }
                    }
                    _ => {}
                }
            }
        };

        Ok(Some(TopicLock::new(topic, heartbeat, releaser)))
    }
}
