use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::seq::SliceRandom;
use streambin_core::{OffsetRangeSet, TopicFile, TopicFileList};
use streambin_storage::StorageDriver;
use tracing::{debug, warn};

use crate::error::Result;

/// Name of sink-side staging directories, pruned from every walk.
const TMP_DIR_MARKER: &str = "+tmp";

/// Lazy discovery of topic directories and record files on the source
/// store.
///
/// A directory is a topic directory iff it is the grandparent of a
/// record file named `*.avro`; only that anchor is load-bearing, the
/// conventional layout being `<topic>/<date>/<file>.avro`. Discovered
/// topics are de-duplicated and shuffled so repeated runs rebalance lock
/// contention across workers.
pub struct SourceScanner {
    driver: Arc<dyn StorageDriver>,
    /// Cap on record files per topic; 0 means unbounded.
    max_files_per_topic: usize,
}

impl SourceScanner {
    pub fn new(driver: Arc<dyn StorageDriver>, max_files_per_topic: usize) -> Self {
        Self {
            driver,
            max_files_per_topic,
        }
    }

    /// Find all topic directories under `root`, shuffled.
    pub async fn find_topic_paths(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut topics = HashSet::new();
        let mut queue = VecDeque::from([root.to_path_buf()]);

        while let Some(dir) = queue.pop_front() {
            for entry in self.driver.list(&dir).await? {
                if entry.is_directory {
                    if !is_tmp_dir(&entry.path) {
                        queue.push_back(entry.path);
                    }
                } else if is_record_file(&entry.path) {
                    if let Some(topic_dir) = entry.path.parent().and_then(Path::parent) {
                        topics.insert(topic_dir.to_path_buf());
                    }
                }
            }
        }

        let mut list: Vec<PathBuf> = topics.into_iter().collect();
        list.sort();
        list.shuffle(&mut rand::thread_rng());
        Ok(list)
    }

    /// Enumerate the record files of one topic that are not yet covered
    /// by `seen` offsets, in discovery order, capped at
    /// `max_files_per_topic` after the filter so bounded runs continue
    /// where the previous one stopped.
    pub async fn topic_files(
        &self,
        topic: &str,
        topic_dir: &Path,
        seen: &OffsetRangeSet,
    ) -> Result<TopicFileList> {
        let mut files = Vec::new();
        let mut queue = VecDeque::from([topic_dir.to_path_buf()]);

        'walk: while let Some(dir) = queue.pop_front() {
            for entry in self.driver.list(&dir).await? {
                if entry.is_directory {
                    if !is_tmp_dir(&entry.path) {
                        queue.push_back(entry.path);
                    }
                    continue;
                }
                if !is_record_file(&entry.path) {
                    debug!(path = %entry.path.display(), "Skipping non-avro file");
                    continue;
                }
                match TopicFile::new(topic, &entry.path) {
                    Ok(file) => {
                        if seen.contains(&file.range) {
                            continue;
                        }
                        files.push(file);
                        if self.max_files_per_topic > 0 && files.len() == self.max_files_per_topic
                        {
                            break 'walk;
                        }
                    }
                    Err(e) => {
                        warn!(path = %entry.path.display(), error = %e, "Skipping file with unparseable name");
                    }
                }
            }
        }

        Ok(TopicFileList::new(files))
    }
}

fn is_tmp_dir(path: &Path) -> bool {
    path.file_name()
        .map(|name| name == TMP_DIR_MARKER)
        .unwrap_or(false)
}

fn is_record_file(path: &Path) -> bool {
    path.extension().map(|ext| ext == "avro").unwrap_or(false)
}
