use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use streambin_core::{OffsetRange, OffsetRangeSet, TopicPartition};
use streambin_storage::StorageDriver;
use tracing::warn;
use uuid::Uuid;

use super::OffsetStore;
use crate::error::Result;

const OFFSETS_HEADER: [&str; 4] = ["offsetFrom", "offsetTo", "topic", "partition"];

/// Offset store keeping one CSV file per topic at
/// `<output>/offsets/<topic>.csv`, written through the target storage
/// driver so the offsets live next to the data they describe.
///
/// Rows are `offsetFrom,offsetTo,topic,partition`. Loading canonicalizes
/// through the range set, so legacy files with overlapping rows self-heal
/// and the next write shrinks them to canonical form.
pub struct FileOffsetStore {
    driver: Arc<dyn StorageDriver>,
    offsets_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl FileOffsetStore {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        output_root: &Path,
        tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            offsets_dir: output_root.join("offsets"),
            tmp_dir: tmp_dir.into(),
        }
    }

    pub fn topic_path(&self, topic: &str) -> PathBuf {
        self.offsets_dir.join(format!("{topic}.csv"))
    }

    async fn try_read(&self, topic: &str) -> Result<OffsetRangeSet> {
        let path = self.topic_path(topic);
        let mut set = OffsetRangeSet::new();
        if self.driver.status(&path).await?.is_none() {
            return Ok(set);
        }

        let reader = self.driver.new_input(&path).await?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        for row in csv_reader.records() {
            let row = row?;
            match parse_row(&row) {
                Some(range) => set.add(&range),
                None => warn!(path = %path.display(), "Skipping malformed offsets row"),
            }
        }
        Ok(set)
    }
}

fn parse_row(row: &csv::StringRecord) -> Option<OffsetRange> {
    let offset_from = row.get(0)?.parse::<u64>().ok()?;
    let offset_to = row.get(1)?.parse::<u64>().ok()?;
    let topic = row.get(2)?;
    let partition = row.get(3)?.parse::<u32>().ok()?;
    OffsetRange::new(TopicPartition::new(topic, partition), offset_from, offset_to).ok()
}

#[async_trait]
impl OffsetStore for FileOffsetStore {
    async fn read(&self, topic: &str) -> OffsetRangeSet {
        match self.try_read(topic).await {
            Ok(set) => set,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Error reading offsets file, processing all offsets");
                OffsetRangeSet::new()
            }
        }
    }

    async fn write(&self, topic: &str, set: &OffsetRangeSet) -> Result<()> {
        let tmp = self.tmp_dir.join(format!("offsets-{}.csv", Uuid::new_v4()));
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(OFFSETS_HEADER)?;
            for range in set.ranges() {
                writer.write_record([
                    range.offset_from.to_string().as_str(),
                    range.offset_to.to_string().as_str(),
                    range.topic(),
                    range.partition().to_string().as_str(),
                ])?;
            }
            writer.flush()?;
        }
        self.driver.store(&tmp, &self.topic_path(topic)).await?;
        Ok(())
    }
}
