use std::io::{Read, Write};

use apache_avro::types::Value;

use super::flatten::to_json;
use super::{RecordConverter, RecordConverterFactory};
use crate::error::Result;

/// Writes one JSON document per record, preserving the record hierarchy.
/// There is no schema pinning, so every record is accepted.
pub struct JsonLinesConverter {
    writer: Box<dyn Write + Send>,
}

impl RecordConverter for JsonLinesConverter {
    fn write_record(&mut self, record: &Value) -> Result<bool> {
        let json = to_json(record)?;
        serde_json::to_writer(&mut self.writer, &json)?;
        self.writer.write_all(b"\n")?;
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

pub struct JsonConverterFactory;

impl RecordConverterFactory for JsonConverterFactory {
    fn name(&self) -> &str {
        "json"
    }

    fn extension(&self) -> &str {
        ".json"
    }

    fn has_header(&self) -> bool {
        false
    }

    fn converter_for(
        &self,
        writer: Box<dyn Write + Send>,
        _example: &Value,
        _write_header: bool,
        _reader: Option<Box<dyn Read + Send>>,
    ) -> Result<Box<dyn RecordConverter>> {
        Ok(Box::new(JsonLinesConverter { writer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record(fields: Vec<(&str, Value)>) -> Value {
        Value::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    #[test]
    fn test_one_document_per_line() {
        let buf = SharedBuf::default();
        let factory = JsonConverterFactory;
        let example = record(vec![]);
        let mut conv = factory
            .converter_for(Box::new(buf.clone()), &example, true, None)
            .unwrap();

        assert!(conv
            .write_record(&record(vec![("a", Value::Int(1))]))
            .unwrap());
        assert!(conv
            .write_record(&record(vec![("a", Value::Int(2))]))
            .unwrap());
        conv.close().unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.trim().lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[0]).unwrap()["a"],
            1
        );
    }

    #[test]
    fn test_always_accepts_schema_drift() {
        let buf = SharedBuf::default();
        let factory = JsonConverterFactory;
        let example = record(vec![]);
        let mut conv = factory
            .converter_for(Box::new(buf), &example, true, None)
            .unwrap();

        assert!(conv
            .write_record(&record(vec![("a", Value::Int(1))]))
            .unwrap());
        assert!(conv
            .write_record(&record(vec![
                ("a", Value::Int(1)),
                ("b", Value::String("extra".to_string())),
            ]))
            .unwrap());
    }
}
