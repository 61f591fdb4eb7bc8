//! Record converters: one typed Avro record in, one output row out.
//!
//! Two interchangeable writers exist. The tabular writer flattens records
//! into CSV rows and pins the column set of its file; the hierarchical
//! writer emits one JSON document per line. `write_record` returns
//! `Ok(false)` when the record's shape is incompatible with the pinned
//! schema, which tells the caller to retry against a suffixed sibling
//! file.

pub mod csv;
pub mod flatten;
pub mod json;

use std::io::{Read, Write};
use std::sync::Arc;

use apache_avro::types::Value;

use crate::error::{Error, Result};

pub use self::csv::CsvConverterFactory;
pub use self::json::JsonConverterFactory;
pub use flatten::{flatten_record, to_json};

/// An open row writer for one output file.
pub trait RecordConverter: Send {
    /// Write one record. Returns `Ok(false)` without emitting anything
    /// when the record does not match the writer's pinned schema.
    fn write_record(&mut self, record: &Value) -> Result<bool>;

    /// Flush buffered rows to the underlying stream. Safe to call with no
    /// pending write.
    fn flush(&mut self) -> Result<()>;

    /// Flush and release the underlying stream.
    fn close(&mut self) -> Result<()>;
}

/// Creates converters for new or existing output files.
pub trait RecordConverterFactory: Send + Sync {
    /// Configuration name, e.g. `csv`.
    fn name(&self) -> &str;

    /// Extension of produced files, including the dot.
    fn extension(&self) -> &str;

    /// Whether produced files start with a header row.
    fn has_header(&self) -> bool;

    /// Open a converter over `writer`. When `write_header` is false the
    /// file already has content and `reader` streams its decompressed
    /// bytes so the pinned schema can be recovered; `example` is only
    /// used to derive the schema of a fresh file and is never written.
    fn converter_for(
        &self,
        writer: Box<dyn Write + Send>,
        example: &Value,
        write_header: bool,
        reader: Option<Box<dyn Read + Send>>,
    ) -> Result<Box<dyn RecordConverter>>;
}

/// Name-keyed converter factory registry; `csv` and `json` are built in.
pub struct FormatRegistry {
    factories: Vec<Arc<dyn RecordConverterFactory>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            factories: vec![
                Arc::new(CsvConverterFactory),
                Arc::new(JsonConverterFactory),
            ],
        }
    }

    pub fn register(&mut self, factory: Arc<dyn RecordConverterFactory>) {
        self.factories.push(factory);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn RecordConverterFactory>> {
        let lower = name.to_lowercase();
        self.factories
            .iter()
            .find(|f| f.name() == lower)
            .cloned()
            .ok_or_else(|| Error::UnknownFormat(name.to_string()))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
