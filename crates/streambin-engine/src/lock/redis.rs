use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::{RemoteLockManager, TopicLock, MIN_LOCK_TTL};
use crate::error::Result;

const RELEASE_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";
const REFRESH_SCRIPT: &str =
    "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('pexpire', KEYS[1], ARGV[2]) else return 0 end";

/// Topic lock manager on redis.
///
/// Acquisition is a single `SET key owner NX PX ttl`; while the handle is
/// live a background task refreshes the TTL at a third of the lease, and
/// release deletes the key only when it still carries our owner token.
pub struct RedisLockManager {
    client: redis::Client,
    prefix: String,
    ttl: Duration,
}

impl RedisLockManager {
    pub fn new(client: redis::Client, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            ttl: ttl.max(MIN_LOCK_TTL),
        }
    }

    fn key(&self, topic: &str) -> String {
        format!("{}/lock/{topic}", self.prefix)
    }
}

#[async_trait::async_trait]
impl RemoteLockManager for RedisLockManager {
    async fn acquire_topic_lock(&self, topic: &str) -> Result<Option<TopicLock>> {
        let key = self.key(topic);
        let token = Uuid::new_v4().to_string();
        let ttl_ms = self.ttl.as_millis() as u64;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        if acquired.is_none() {
            return Ok(None);
        }
        debug!(topic = %topic, "Acquired topic lock");

        let heartbeat = {
            let client = self.client.clone();
            let key = key.clone();
            let token = token.clone();
            let interval = self.ttl / 3;
            tokio::spawn(async move {
                let refresh = redis::Script::new(REFRESH_SCRIPT);
                loop {
                    tokio::time::sleep(interval).await;
                    let result = async {
                        let mut conn = client.get_multiplexed_async_connection().await?;
                        refresh
                            .key(&key)
                            .arg(&token)
                            .arg(ttl_ms)
                            .invoke_async::<_, i64>(&mut conn)
                            .await
                    }
                    .await;
                    match result {
                        Ok(1) => {}
                        Ok(_) => {
                            warn!(key = %key, "Topic lock lost its lease");
                            return;
                        }
                        Err(e) => warn!(key = %key, error = %e, "Failed to refresh topic lock"),
                    }
                }
            })
        };

        let releaser = {
            let client = self.client.clone();
            let key = key.clone();
            async move {
                let release = redis::Script::new(RELEASE_SCRIPT);
                let result = async {
                    let mut conn = client.get_multiplexed_async_connection().await?;
                    release
                        .key(&key)
                        .arg(&token)
                        .invoke_async::<_, i64>(&mut conn)
                        .await
                }
                .await;
                if let Err(e) = result {
                    // The TTL reclaims the lease eventually.
                    warn!(key = %key, error = %e, "Failed to release topic lock");
                }
            }
        };

        Ok(Some(TopicLock::new(topic, heartbeat, releaser)))
    }
}
