use std::collections::BTreeMap;

use apache_avro::types::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Error, Result};

/// Flatten a hierarchical Avro record into `(column, cell)` pairs.
///
/// Nested record fields are dot-joined (`a.b.c`), array elements indexed
/// (`a.0`), map entries keyed by their map key, and unions resolved to the
/// active branch. Map keys are visited in sorted order so the column list
/// is deterministic. Bytes and fixed values become base64, enums and
/// strings their string form, and primitives their plain rendering.
pub fn flatten_record(record: &Value) -> Result<Vec<(String, String)>> {
    let Value::Record(fields) = resolve_union(record) else {
        return Err(Error::RecordMapping(format!(
            "top-level value is not a record: {record:?}"
        )));
    };

    let mut cells = Vec::new();
    for (name, value) in fields {
        flatten_value(value, name, &mut cells)?;
    }
    Ok(cells)
}

fn flatten_value(value: &Value, prefix: &str, cells: &mut Vec<(String, String)>) -> Result<()> {
    match resolve_union(value) {
        Value::Record(fields) => {
            for (name, sub) in fields {
                flatten_value(sub, &format!("{prefix}.{name}"), cells)?;
            }
        }
        Value::Map(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            for (key, sub) in sorted {
                flatten_value(sub, &format!("{prefix}.{key}"), cells)?;
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_value(item, &format!("{prefix}.{index}"), cells)?;
            }
        }
        other => {
            cells.push((prefix.to_string(), render_scalar(other)?));
        }
    }
    Ok(())
}

/// Unwrap union values to the active branch.
fn resolve_union(value: &Value) -> &Value {
    match value {
        Value::Union(_, inner) => resolve_union(inner),
        other => other,
    }
}

fn render_scalar(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => String::new(),
        Value::Boolean(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Long(l) => l.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Double(d) => d.to_string(),
        Value::String(s) => s.clone(),
        Value::Enum(_, symbol) => symbol.clone(),
        Value::Bytes(bytes) => BASE64.encode(bytes),
        Value::Fixed(_, bytes) => BASE64.encode(bytes),
        Value::Date(days) => days.to_string(),
        Value::TimeMillis(t) => t.to_string(),
        Value::TimeMicros(t) => t.to_string(),
        Value::TimestampMillis(t) => t.to_string(),
        Value::TimestampMicros(t) => t.to_string(),
        Value::Uuid(id) => id.to_string(),
        other => {
            return Err(Error::RecordMapping(format!(
                "cannot flatten field value {other:?}"
            )))
        }
    })
}

/// Convert an Avro value to a hierarchical JSON value, preserving the
/// record structure. Bytes become base64 strings, matching the flat form.
pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    use serde_json::Value as Json;

    Ok(match resolve_union(value) {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Long(l) => Json::from(*l),
        Value::Float(f) => serde_json::Number::from_f64(f64::from(*f))
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Enum(_, symbol) => Json::String(symbol.clone()),
        Value::Bytes(bytes) => Json::String(BASE64.encode(bytes)),
        Value::Fixed(_, bytes) => Json::String(BASE64.encode(bytes)),
        Value::Date(days) => Json::from(*days),
        Value::TimeMillis(t) => Json::from(*t),
        Value::TimeMicros(t) => Json::from(*t),
        Value::TimestampMillis(t) => Json::from(*t),
        Value::TimestampMicros(t) => Json::from(*t),
        Value::Uuid(id) => Json::String(id.to_string()),
        Value::Array(items) => {
            Json::Array(items.iter().map(to_json).collect::<Result<_>>()?)
        }
        Value::Map(map) => {
            let mut obj = serde_json::Map::new();
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            for (key, sub) in sorted {
                obj.insert(key.clone(), to_json(sub)?);
            }
            Json::Object(obj)
        }
        Value::Record(fields) => {
            let mut obj = serde_json::Map::new();
            for (name, sub) in fields {
                obj.insert(name.clone(), to_json(sub)?);
            }
            Json::Object(obj)
        }
        other => {
            return Err(Error::RecordMapping(format!(
                "cannot convert value {other:?} to JSON"
            )))
        }
    })
}
