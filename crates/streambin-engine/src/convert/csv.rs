use std::io::{Read, Write};

use apache_avro::types::Value;

use super::flatten::flatten_record;
use super::{RecordConverter, RecordConverterFactory};
use crate::error::{Error, Result};

/// Flattens hierarchical records into CSV rows.
///
/// The first record written to a fresh file pins the column list and
/// order; every following record must flatten to exactly the same columns
/// in the same order or `write_record` returns `Ok(false)`. When appending
/// to an existing file the pin is read from its header row instead.
pub struct CsvConverter {
    writer: csv::Writer<Box<dyn Write + Send>>,
    columns: Vec<String>,
}

impl CsvConverter {
    fn new(
        writer: Box<dyn Write + Send>,
        example: &Value,
        write_header: bool,
        reader: Option<Box<dyn Read + Send>>,
    ) -> Result<Self> {
        let columns = if write_header {
            flatten_record(example)?
                .into_iter()
                .map(|(column, _)| column)
                .collect()
        } else {
            let reader = reader.ok_or_else(|| {
                Error::RecordMapping("existing CSV file requires a header reader".to_string())
            })?;
            read_header(reader)?
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        if write_header {
            writer.write_record(&columns)?;
        }

        Ok(Self { writer, columns })
    }
}

fn read_header(reader: Box<dyn Read + Send>) -> Result<Vec<String>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(reader);
    let mut record = csv::StringRecord::new();
    if !csv_reader.read_record(&mut record)? {
        return Err(Error::RecordMapping(
            "existing CSV file has no header row".to_string(),
        ));
    }
    Ok(record.iter().map(str::to_string).collect())
}

impl RecordConverter for CsvConverter {
    fn write_record(&mut self, record: &Value) -> Result<bool> {
        let cells = flatten_record(record)?;

        if cells.len() != self.columns.len() {
            return Ok(false);
        }
        for (pinned, (column, _)) in self.columns.iter().zip(cells.iter()) {
            if pinned != column {
                return Ok(false);
            }
        }

        self.writer.write_record(cells.iter().map(|(_, cell)| cell))?;
        Ok(true)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()
    }
}

pub struct CsvConverterFactory;

impl RecordConverterFactory for CsvConverterFactory {
    fn name(&self) -> &str {
        "csv"
    }

    fn extension(&self) -> &str {
        ".csv"
    }

    fn has_header(&self) -> bool {
        true
    }

    fn converter_for(
        &self,
        writer: Box<dyn Write + Send>,
        example: &Value,
        write_header: bool,
        reader: Option<Box<dyn Read + Send>>,
    ) -> Result<Box<dyn RecordConverter>> {
        Ok(Box::new(CsvConverter::new(
            writer,
            example,
            write_header,
            reader,
        )?))
    }
}
