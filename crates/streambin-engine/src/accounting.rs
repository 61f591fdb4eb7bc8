use std::path::Path;
use std::sync::{Arc, Mutex};

use streambin_core::{Ledger, OffsetRange, OffsetRangeSet, TopicPartition};
use streambin_storage::StorageDriver;
use tracing::{debug, warn};

use crate::bins::Frequency;
use crate::error::Result;
use crate::offsets::postponed::DEFAULT_DEBOUNCE;
use crate::offsets::{OffsetStore, PostponedWriter};

/// Owns the processed-offset state of one topic.
///
/// The accountant loads the persisted range set from the offset store,
/// merges ledgers staged by file caches, and persists through a postponed
/// writer so bursts of small commits coalesce into one durable write.
/// Workers consult it for crash-resume idempotence before re-emitting a
/// record. Writer threads call in concurrently; all mutation serializes
/// behind the internal lock.
pub struct Accountant {
    topic: String,
    offsets: Arc<Mutex<OffsetRangeSet>>,
    bins: Arc<Frequency>,
    store: Arc<dyn OffsetStore>,
    writer: Mutex<Option<PostponedWriter>>,
    tmp_dir: tempfile::TempDir,
}

impl Accountant {
    pub async fn new(
        store: Arc<dyn OffsetStore>,
        target: Arc<dyn StorageDriver>,
        output_root: &Path,
        topic: &str,
        tmp_root: &Path,
    ) -> Result<Self> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("accountant-")
            .tempdir_in(tmp_root)?;

        let offsets = Arc::new(Mutex::new(store.read(topic).await));
        let bins = Arc::new(Frequency::new(
            target,
            output_root.join("bins.csv"),
            tmp_dir.path(),
        ));

        let writer = {
            let store = store.clone();
            let offsets = offsets.clone();
            let bins = bins.clone();
            let topic = topic.to_string();
            PostponedWriter::spawn(DEFAULT_DEBOUNCE, move || {
                let store = store.clone();
                let offsets = offsets.clone();
                let bins = bins.clone();
                let topic = topic.clone();
                async move {
                    let snapshot = offsets.lock().unwrap().clone();
                    if let Err(e) = store.write(&topic, &snapshot).await {
                        warn!(topic = %topic, error = %e, "Failed to write offsets, will retry on next trigger");
                    }
                    if let Err(e) = bins.write().await {
                        warn!(topic = %topic, error = %e, "Failed to write bins, will retry on next trigger");
                    }
                }
            })
        };

        Ok(Self {
            topic: topic.to_string(),
            offsets,
            bins,
            store,
            writer: Mutex::new(Some(writer)),
            tmp_dir,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Temp directory for scratch files of this topic's pipeline.
    pub fn tmp_dir(&self) -> &Path {
        self.tmp_dir.path()
    }

    /// Merge a staged ledger into the persisted set and request a
    /// coalesced durable write.
    pub fn process(&self, ledger: Ledger) {
        if ledger.is_empty() {
            return;
        }
        self.offsets.lock().unwrap().add_all(ledger.offsets());
        self.bins.add_all(ledger.bins());
        self.trigger_write();
    }

    /// Commit a whole file's offset range after its last record.
    pub fn commit_range(&self, range: &OffsetRange) {
        debug!(topic = %self.topic, range = %range, "Committing file range");
        self.offsets.lock().unwrap().add(range);
        self.trigger_write();
    }

    pub fn contains_offset(&self, topic_partition: &TopicPartition, offset: u64) -> bool {
        self.offsets
            .lock()
            .unwrap()
            .contains_offset(topic_partition, offset)
    }

    pub fn contains_range(&self, range: &OffsetRange) -> bool {
        self.offsets.lock().unwrap().contains(range)
    }

    /// Read-only snapshot of the current set, for scanning.
    pub fn offsets(&self) -> OffsetRangeSet {
        self.offsets.lock().unwrap().clone()
    }

    fn trigger_write(&self) {
        if let Some(writer) = self.writer.lock().unwrap().as_ref() {
            writer.trigger();
        }
    }

    /// Synchronous durable write of the current state.
    pub async fn flush(&self) -> Result<()> {
        let snapshot = self.offsets.lock().unwrap().clone();
        self.store.write(&self.topic, &snapshot).await?;
        self.bins.write().await?;
        Ok(())
    }

    /// Force a final write, stop the background writer and drop the
    /// private temp directory.
    pub async fn close(&self) -> Result<()> {
        let writer = self.writer.lock().unwrap().take();
        if let Some(writer) = writer {
            writer.close().await;
        }
        Ok(())
    }
}
