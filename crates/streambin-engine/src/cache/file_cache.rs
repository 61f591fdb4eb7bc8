use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use apache_avro::types::Value;
use streambin_core::{Bin, Ledger, Transaction};
use streambin_storage::{CompressionCodec, StorageDriver};
use tracing::warn;
use uuid::Uuid;

use crate::accounting::Accountant;
use crate::convert::{RecordConverter, RecordConverterFactory};
use crate::dedup::deduplicate_file;
use crate::error::{Error, Result};

/// One open output writer for one target path.
///
/// Rows go to a temp file under the worker's temp directory; the target
/// is only touched on close, when the temp file is published through the
/// storage driver. If the target already exists its bytes are carried
/// into the temp file first, so appends preserve prior content, and the
/// converter re-reads its pinned header through the codec.
///
/// Offsets of successfully written rows are staged in a private ledger
/// and handed to the accountant on flush and close. An errored cache
/// deletes its temp file and never publishes, so a write failure cannot
/// leave a half-written target behind.
pub struct FileCache {
    target: PathBuf,
    tmp_path: PathBuf,
    converter: Option<Box<dyn RecordConverter>>,
    driver: Arc<dyn StorageDriver>,
    accountant: Arc<Accountant>,
    codec: Arc<dyn CompressionCodec>,
    entry_name: String,
    has_header: bool,
    dedup_fields: Option<Vec<String>>,
    ledger: Ledger,
    last_use: Option<Instant>,
    has_error: bool,
}

impl FileCache {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        driver: Arc<dyn StorageDriver>,
        converter_factory: &dyn RecordConverterFactory,
        codec: Arc<dyn CompressionCodec>,
        target: PathBuf,
        example: &Value,
        tmp_dir: &Path,
        accountant: Arc<Accountant>,
        dedup_fields: Option<Vec<String>>,
    ) -> Result<Self> {
        let tmp_path = tmp_dir.join(Uuid::new_v4().to_string());
        let entry_name = entry_name(&target, codec.as_ref());

        let exists = matches!(driver.status(&target).await?, Some(size) if size > 0);

        let converter: Box<dyn RecordConverter> = if exists {
            let writer = if codec.appendable() {
                // Keep the prior bytes verbatim and open a fresh stream
                // behind them; for gzip this appends a new member.
                let mut reader = driver.new_input(&target).await?;
                let mut tmp_file = std::fs::File::create(&tmp_path)?;
                std::io::copy(&mut reader, &mut tmp_file)?;
                drop(tmp_file);

                let file = std::fs::OpenOptions::new().append(true).open(&tmp_path)?;
                codec.wrap_writer(Box::new(file), &entry_name)?
            } else {
                // Archives cannot be concatenated; replay the prior
                // content through the new stream instead.
                let file = std::fs::File::create(&tmp_path)?;
                let mut writer = codec.wrap_writer(Box::new(file), &entry_name)?;
                let mut old = codec.wrap_reader(driver.new_input(&target).await?)?;
                std::io::copy(&mut old, &mut writer)?;
                writer
            };

            let header_reader = codec.wrap_reader(driver.new_input(&target).await?)?;
            converter_factory.converter_for(writer, example, false, Some(header_reader))?
        } else {
            let file = std::fs::File::create(&tmp_path)?;
            let writer = codec.wrap_writer(Box::new(file), &entry_name)?;
            converter_factory.converter_for(writer, example, true, None)?
        };

        Ok(Self {
            target,
            tmp_path,
            converter: Some(converter),
            driver,
            accountant,
            codec,
            entry_name,
            has_header: converter_factory.has_header(),
            dedup_fields,
            ledger: Ledger::new(),
            last_use: None,
            has_error: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Last time a write was attempted; fresh caches sort before all
    /// used ones.
    pub fn last_use(&self) -> Option<Instant> {
        self.last_use
    }

    /// Write one row. On success the transaction and bin tick are staged
    /// in the ledger; an incompatible record returns `Ok(false)` leaving
    /// the ledger untouched. A write error marks the cache as errored.
    pub fn write_record(
        &mut self,
        transaction: &Transaction,
        bin: Bin,
        record: &Value,
    ) -> Result<bool> {
        let Some(converter) = self.converter.as_mut() else {
            return Err(Error::Io(std::io::Error::other("cache already closed")));
        };
        match converter.write_record(record) {
            Ok(written) => {
                self.last_use = Some(Instant::now());
                if written {
                    self.ledger.add(transaction, bin);
                }
                Ok(written)
            }
            Err(e) => {
                self.has_error = true;
                Err(e)
            }
        }
    }

    /// Flush buffered rows and persist the staged ledger.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(converter) = self.converter.as_mut() {
            converter.flush()?;
        }
        self.accountant.process(std::mem::take(&mut self.ledger));
        Ok(())
    }

    /// Mark the cache errored; close will drop the temp file instead of
    /// publishing.
    pub fn mark_error(&mut self) {
        self.has_error = true;
    }

    /// Flush, release the stream, and publish the temp file to the
    /// target. An errored cache only removes its temp file.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut converter) = self.converter.take() {
            let closed = converter.close();
            // Dropping the converter finalizes the compression chain.
            drop(converter);
            if closed.is_err() {
                self.has_error = true;
                self.remove_tmp();
                return closed;
            }
        }

        if self.has_error {
            self.remove_tmp();
            return Ok(());
        }

        if let Some(fields) = &self.dedup_fields {
            deduplicate_file(
                &self.tmp_path,
                self.codec.as_ref(),
                self.has_header,
                fields,
                &self.entry_name,
            )?;
        }

        self.driver.store(&self.tmp_path, &self.target).await?;
        self.accountant.process(std::mem::take(&mut self.ledger));
        Ok(())
    }

    fn remove_tmp(&self) {
        if let Err(e) = std::fs::remove_file(&self.tmp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.tmp_path.display(), error = %e, "Failed to remove temporary file");
            }
        }
    }
}

/// Logical entry name of the target: the filename without the codec's
/// extension, e.g. `20170502_0700.csv` for `20170502_0700.csv.gz`.
fn entry_name(target: &Path, codec: &dyn CompressionCodec) -> String {
    let filename = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match filename.strip_suffix(codec.extension()) {
        Some(stripped) if !codec.extension().is_empty() => stripped.to_string(),
        _ => filename,
    }
}
