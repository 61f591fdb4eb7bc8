use std::io::{self, Read, Seek, Write};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};

/// Writer bound used by codecs: the underlying temp file is both writable
/// and seekable, which archive formats need to finalize their directory.
pub trait WriteSeek: Write + Seek + Send {}

impl<T: Write + Seek + Send> WriteSeek for T {}

/// Pluggable compression of output files.
///
/// Codecs that support raw appends (gzip concatenates members, identity is
/// a plain append) let the file cache copy an existing target verbatim and
/// open a fresh compressed stream behind it. Archive formats like zip
/// cannot be concatenated, so their prior content is carried over through
/// the decompressed stream instead.
pub trait CompressionCodec: Send + Sync {
    /// Primary short name used in configuration, e.g. `gzip`.
    fn name(&self) -> &str;

    /// Alternative configuration names.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Extension appended to output filenames, including the dot, or empty.
    fn extension(&self) -> &str;

    /// Whether raw bytes of an existing file may precede a new stream.
    fn appendable(&self) -> bool {
        true
    }

    /// Wrap a writer with compression. `entry_name` is the logical file
    /// name, used by archive formats for their single entry.
    fn wrap_writer(
        &self,
        writer: Box<dyn WriteSeek>,
        entry_name: &str,
    ) -> io::Result<Box<dyn Write + Send>>;

    /// Wrap a reader with decompression.
    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>>;
}

/// Pass-through codec.
pub struct IdentityCompression;

impl CompressionCodec for IdentityCompression {
    fn name(&self) -> &str {
        "identity"
    }

    fn aliases(&self) -> &[&str] {
        &["none"]
    }

    fn extension(&self) -> &str {
        ""
    }

    fn wrap_writer(
        &self,
        writer: Box<dyn WriteSeek>,
        _entry_name: &str,
    ) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(writer))
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(reader)
    }
}

/// Gzip codec. Appends open a new member; readers decode the whole
/// concatenated member sequence.
pub struct GzipCompression;

impl CompressionCodec for GzipCompression {
    fn name(&self) -> &str {
        "gzip"
    }

    fn aliases(&self) -> &[&str] {
        &["gz"]
    }

    fn extension(&self) -> &str {
        ".gz"
    }

    fn wrap_writer(
        &self,
        writer: Box<dyn WriteSeek>,
        _entry_name: &str,
    ) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(GzEncoder::new(writer, flate2::Compression::default())))
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    }
}

/// Zip codec writing a single-entry archive. Not appendable: existing
/// content is re-encoded rather than concatenated.
pub struct ZipCompression;

impl CompressionCodec for ZipCompression {
    fn name(&self) -> &str {
        "zip"
    }

    fn extension(&self) -> &str {
        ".zip"
    }

    fn appendable(&self) -> bool {
        false
    }

    fn wrap_writer(
        &self,
        writer: Box<dyn WriteSeek>,
        entry_name: &str,
    ) -> io::Result<Box<dyn Write + Send>> {
        let mut zip_writer = zip::ZipWriter::new(writer);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        zip_writer
            .start_file(entry_name, options)
            .map_err(io::Error::other)?;
        Ok(Box::new(ZipEntryWriter {
            inner: Some(zip_writer),
        }))
    }

    fn wrap_reader(&self, mut reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        // Archives do not stream; decode the single entry up front.
        let mut content = Vec::new();
        match zip::read::read_zipfile_from_stream(&mut reader) {
            Ok(Some(mut entry)) => {
                entry.read_to_end(&mut content)?;
            }
            Ok(None) => {}
            Err(e) => return Err(io::Error::other(e)),
        }
        Ok(Box::new(io::Cursor::new(content)))
    }
}

/// Finalizes the archive when the writer chain is dropped.
struct ZipEntryWriter {
    inner: Option<zip::ZipWriter<Box<dyn WriteSeek>>>,
}

impl Write for ZipEntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::other("zip archive already finalized")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ZipEntryWriter {
    fn drop(&mut self) {
        if let Some(mut writer) = self.inner.take() {
            if let Err(e) = writer.finish() {
                tracing::warn!(error = %e, "Failed to finalize zip archive");
            }
        }
    }
}

/// Name-keyed codec registry. Built-in codecs are registered by default;
/// custom codecs register before configuration is resolved.
pub struct CompressionRegistry {
    codecs: Vec<Arc<dyn CompressionCodec>>,
}

impl CompressionRegistry {
    pub fn new() -> Self {
        Self {
            codecs: vec![
                Arc::new(IdentityCompression),
                Arc::new(GzipCompression),
                Arc::new(ZipCompression),
            ],
        }
    }

    pub fn register(&mut self, codec: Arc<dyn CompressionCodec>) {
        self.codecs.push(codec);
    }

    /// Resolve a codec by name or alias, case-insensitively.
    pub fn get(&self, name: &str) -> Result<Arc<dyn CompressionCodec>> {
        let lower = name.to_lowercase();
        self.codecs
            .iter()
            .find(|c| c.name() == lower || c.aliases().contains(&lower.as_str()))
            .cloned()
            .ok_or_else(|| Error::UnknownCodec(name.to_string()))
    }
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
