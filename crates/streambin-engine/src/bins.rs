use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use streambin_core::Bin;
use streambin_storage::StorageDriver;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

const BINS_HEADER: [&str; 4] = ["topic", "category", "timeBin", "count"];

/// Tally of records per `(topic, category, time bin)`, persisted to
/// `bins.csv` under the output root.
///
/// The tally holds deltas only; a write merges them into whatever counts
/// are already on the target, so concurrent workers lose at most a
/// best-effort race, never the whole file. Staging is synchronous, writes
/// are async; on a failed write the staged deltas are restored for the
/// next attempt.
pub struct Frequency {
    driver: Arc<dyn StorageDriver>,
    path: PathBuf,
    tmp_dir: PathBuf,
    deltas: Mutex<HashMap<Bin, u64>>,
}

impl Frequency {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        path: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver,
            path: path.into(),
            tmp_dir: tmp_dir.into(),
            deltas: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, bin: Bin, count: u64) {
        *self.deltas.lock().unwrap().entry(bin).or_insert(0) += count;
    }

    pub fn add_all(&self, bins: &HashMap<Bin, u64>) {
        let mut deltas = self.deltas.lock().unwrap();
        for (bin, count) in bins {
            *deltas.entry(bin.clone()).or_insert(0) += count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.lock().unwrap().is_empty()
    }

    /// Merge the accumulated deltas into the stored tally and publish it.
    /// A no-op when nothing accumulated since the last write.
    pub async fn write(&self) -> Result<()> {
        let taken = {
            let mut deltas = self.deltas.lock().unwrap();
            if deltas.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *deltas)
        };

        if let Err(e) = self.publish(&taken).await {
            // Restage so the next trigger retries these counts.
            let mut deltas = self.deltas.lock().unwrap();
            for (bin, count) in taken {
                *deltas.entry(bin).or_insert(0) += count;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn publish(&self, deltas: &HashMap<Bin, u64>) -> Result<()> {
        let mut totals = self.read_existing().await;
        for (bin, count) in deltas {
            *totals.entry(bin.clone()).or_insert(0) += count;
        }

        let mut rows: Vec<(&Bin, &u64)> = totals.iter().collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));

        let tmp = self.tmp_dir.join(format!("bins-{}.csv", Uuid::new_v4()));
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(BINS_HEADER)?;
            for (bin, count) in rows {
                writer.write_record([
                    bin.topic.as_str(),
                    bin.category.as_str(),
                    bin.time_bin.as_str(),
                    &count.to_string(),
                ])?;
            }
            writer.flush()?;
        }
        self.driver.store(&tmp, &self.path).await?;
        Ok(())
    }

    async fn read_existing(&self) -> HashMap<Bin, u64> {
        match self.try_read(&self.path).await {
            Ok(totals) => totals,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read bins file, starting fresh");
                HashMap::new()
            }
        }
    }

    async fn try_read(&self, path: &Path) -> Result<HashMap<Bin, u64>> {
        let mut totals = HashMap::new();
        if self.driver.status(path).await?.is_none() {
            return Ok(totals);
        }
        let reader = self.driver.new_input(path).await?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        for row in csv_reader.records() {
            let row = row?;
            let (Some(topic), Some(category), Some(time_bin), Some(count)) =
                (row.get(0), row.get(1), row.get(2), row.get(3))
            else {
                warn!(path = %path.display(), "Skipping malformed bins row");
                continue;
            };
            match count.parse::<u64>() {
                Ok(count) => {
                    *totals
                        .entry(Bin::new(topic, category, time_bin))
                        .or_insert(0) += count;
                }
                Err(_) => warn!(path = %path.display(), "Skipping bins row with bad count"),
            }
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streambin_storage::LocalStorageDriver;

    fn bin(topic: &str, time_bin: &str) -> Bin {
        Bin::new(topic, "source-1", time_bin)
    }

    #[tokio::test]
    async fn test_write_creates_file_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let driver: Arc<dyn StorageDriver> = Arc::new(LocalStorageDriver::new());
        let path = dir.path().join("bins.csv");

        let frequency = Frequency::new(driver, &path, dir.path());
        frequency.add(bin("a", "20170502_0700"), 2);
        frequency.write().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "topic,category,timeBin,count\na,source-1,20170502_0700,2\n"
        );
    }

    #[tokio::test]
    async fn test_write_merges_with_existing_counts() {
        let dir = tempfile::tempdir().unwrap();
        let driver: Arc<dyn StorageDriver> = Arc::new(LocalStorageDriver::new());
        let path = dir.path().join("bins.csv");

        let frequency = Frequency::new(driver.clone(), &path, dir.path());
        frequency.add(bin("a", "20170502_0700"), 2);
        frequency.write().await.unwrap();

        // A second tally instance, as another worker would hold.
        let frequency = Frequency::new(driver, &path, dir.path());
        frequency.add(bin("a", "20170502_0700"), 3);
        frequency.add(bin("b", "20170502_0800"), 1);
        frequency.write().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("a,source-1,20170502_0700,5"));
        assert!(content.contains("b,source-1,20170502_0800,1"));
    }

    #[tokio::test]
    async fn test_write_without_deltas_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let driver: Arc<dyn StorageDriver> = Arc::new(LocalStorageDriver::new());
        let path = dir.path().join("bins.csv");

        let frequency = Frequency::new(driver, &path, dir.path());
        frequency.write().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_deltas_cleared_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let driver: Arc<dyn StorageDriver> = Arc::new(LocalStorageDriver::new());
        let path = dir.path().join("bins.csv");

        let frequency = Frequency::new(driver, &path, dir.path());
        frequency.add(bin("a", "20170502_0700"), 1);
        frequency.write().await.unwrap();
        assert!(frequency.is_empty());

        // A second write must not double-count.
        frequency.write().await.unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("a,source-1,20170502_0700,1"));
    }

    #[tokio::test]
    async fn test_add_all_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let driver: Arc<dyn StorageDriver> = Arc::new(LocalStorageDriver::new());
        let frequency = Frequency::new(driver, dir.path().join("bins.csv"), dir.path());

        let mut staged = HashMap::new();
        staged.insert(bin("a", "20170502_0700"), 2);
        frequency.add_all(&staged);
        frequency.add_all(&staged);
        assert!(!frequency.is_empty());

        frequency.write().await.unwrap();
        let content = std::fs::read_to_string(dir.path().join("bins.csv")).unwrap();
        assert!(content.contains("a,source-1,20170502_0700,4"));
    }
}
