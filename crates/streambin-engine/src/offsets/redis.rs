use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streambin_core::{OffsetRange, OffsetRangeSet, TopicPartition};
use tracing::warn;

use super::OffsetStore;
use crate::error::Result;

/// Offset store keeping one JSON envelope per topic in redis.
///
/// Keys are `<prefix>/offsets/<topic>`; the envelope groups ranges by
/// topic partition:
/// `{"partitions":[{"topic":…,"partition":…,"ranges":[{"from":…,"to":…,"lastProcessed":…}]}]}`.
pub struct RedisOffsetStore {
    client: redis::Client,
    prefix: String,
}

impl RedisOffsetStore {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn key(&self, topic: &str) -> String {
        format!("{}/offsets/{topic}", self.prefix)
    }

    async fn try_read(&self, topic: &str) -> Result<OffsetRangeSet> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.key(topic))
            .query_async(&mut conn)
            .await?;
        match payload {
            Some(json) => {
                let envelope: OffsetEnvelope = serde_json::from_str(&json)?;
                Ok(from_envelope(envelope))
            }
            None => Ok(OffsetRangeSet::new()),
        }
    }
}

#[async_trait::async_trait]
impl OffsetStore for RedisOffsetStore {
    async fn read(&self, topic: &str) -> OffsetRangeSet {
        match self.try_read(topic).await {
            Ok(set) => set,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Error reading offsets from redis, processing all offsets");
                OffsetRangeSet::new()
            }
        }
    }

    async fn write(&self, topic: &str, set: &OffsetRangeSet) -> Result<()> {
        let json = serde_json::to_string(&to_envelope(set))?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("SET")
            .arg(self.key(topic))
            .arg(json)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OffsetEnvelope {
    partitions: Vec<PartitionRanges>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionRanges {
    topic: String,
    partition: u32,
    ranges: Vec<RangeEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RangeEntry {
    from: u64,
    to: u64,
    #[serde(rename = "lastProcessed")]
    last_processed: DateTime<Utc>,
}

fn to_envelope(set: &OffsetRangeSet) -> OffsetEnvelope {
    let mut partitions: Vec<PartitionRanges> = Vec::new();
    for range in set.ranges() {
        let entry = RangeEntry {
            from: range.offset_from,
            to: range.offset_to,
            last_processed: range.last_processed,
        };
        match partitions.last_mut() {
            Some(last)
                if last.topic == range.topic_partition.topic
                    && last.partition == range.topic_partition.partition =>
            {
                last.ranges.push(entry);
            }
            _ => partitions.push(PartitionRanges {
                topic: range.topic_partition.topic.clone(),
                partition: range.topic_partition.partition,
                ranges: vec![entry],
            }),
        }
    }
    OffsetEnvelope { partitions }
}

fn from_envelope(envelope: OffsetEnvelope) -> OffsetRangeSet {
    let mut set = OffsetRangeSet::new();
    for partition in envelope.partitions {
        let tp = TopicPartition::new(partition.topic, partition.partition);
        for entry in partition.ranges {
            match OffsetRange::new(tp.clone(), entry.from, entry.to) {
                Ok(mut range) => {
                    range.last_processed = entry.last_processed;
                    set.add(&range);
                }
                Err(e) => warn!(error = %e, "Skipping invalid stored range"),
            }
        }
    }
    set
}
