use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

use streambin_storage::CompressionCodec;
use tracing::debug;

use crate::error::Result;

/// Remove duplicate rows from a finished temp file before publish,
/// keeping the first occurrence of each duplicate.
///
/// With an empty field list rows compare as whole lines. With named
/// fields, two rows are duplicates iff they agree on every named column,
/// resolved through the file's header; a row that lacks one of the named
/// columns never matches anything. Headerless formats always compare
/// whole lines.
///
/// The file is only rewritten when something was actually dropped.
pub fn deduplicate_file(
    path: &Path,
    codec: &dyn CompressionCodec,
    has_header: bool,
    fields: &[String],
    entry_name: &str,
) -> Result<()> {
    let mut content = String::new();
    {
        let file = std::fs::File::open(path)?;
        let mut reader = codec.wrap_reader(Box::new(file))?;
        reader.read_to_string(&mut content)?;
    }

    let mut lines = content.lines();
    let header = if has_header { lines.next() } else { None };
    let data: Vec<&str> = lines.collect();

    let field_indices = match (header, fields.is_empty()) {
        (Some(header_line), false) => resolve_fields(header_line, fields),
        _ => None,
    };

    let mut seen = HashSet::new();
    let kept: Vec<&str> = data
        .iter()
        .filter(|line| match row_key(line, field_indices.as_deref()) {
            Some(key) => seen.insert(key),
            // No comparable key: the row never matches anything.
            None => true,
        })
        .copied()
        .collect();

    if kept.len() == data.len() {
        return Ok(());
    }
    debug!(
        path = %path.display(),
        dropped = data.len() - kept.len(),
        "Deduplicated output file"
    );

    let rewritten = path.with_extension("dedup");
    {
        let file = std::fs::File::create(&rewritten)?;
        let mut writer = codec.wrap_writer(Box::new(file), entry_name)?;
        if let Some(header_line) = header {
            writer.write_all(header_line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        for line in kept {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    std::fs::rename(&rewritten, path)?;
    Ok(())
}

/// Map the named dedup fields to their header positions. Fields missing
/// from the header disable subset comparison entirely: no row can carry
/// them, so no row matches.
fn resolve_fields(header_line: &str, fields: &[String]) -> Option<Vec<usize>> {
    let columns = parse_csv_line(header_line)?;
    fields
        .iter()
        .map(|field| columns.iter().position(|c| c == field))
        .collect()
}

fn row_key(line: &str, field_indices: Option<&[usize]>) -> Option<String> {
    match field_indices {
        None => Some(line.to_string()),
        Some(indices) => {
            let cells = parse_csv_line(line)?;
            let mut key = String::new();
            for &index in indices {
                key.push_str(cells.get(index)?);
                key.push('\u{1f}');
            }
            Some(key)
        }
    }
}

fn parse_csv_line(line: &str) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(str::to_string).collect()),
        _ => None,
    }
}
