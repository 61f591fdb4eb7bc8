use std::path::{Path, PathBuf};

use apache_avro::types::Value;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};

/// Where a single record lands in the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrganization {
    pub path: PathBuf,
    pub category: String,
    pub time: Option<DateTime<Utc>>,
}

/// Time bin format of output filenames, always evaluated in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBinFormat {
    /// `YYYYMMDD_HH00`, the default.
    Hourly,
    /// `YYYYMM`.
    Monthly,
}

impl TimeBinFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "hourly" => Ok(TimeBinFormat::Hourly),
            "monthly" => Ok(TimeBinFormat::Monthly),
            other => Err(Error::RecordMapping(format!(
                "unknown time bin format: '{other}'"
            ))),
        }
    }

    fn format(&self, time: DateTime<Utc>) -> String {
        match self {
            TimeBinFormat::Hourly => time.format("%Y%m%d_%H00").to_string(),
            TimeBinFormat::Monthly => time.format("%Y%m").to_string(),
        }
    }
}

/// Maps `(topic, record, attempt)` to the record's target path.
///
/// Output paths follow `<root>/<project>/<user>/<topic>/<bin><suffix><ext>`
/// where the extension includes both the converter and the compression
/// extension, and the suffix is `_<attempt>` for retries after a schema
/// mismatch.
pub struct RecordPathFactory {
    root: PathBuf,
    extension: String,
    bin_format: TimeBinFormat,
}

impl RecordPathFactory {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            bin_format: TimeBinFormat::Hourly,
        }
    }

    pub fn with_bin_format(mut self, bin_format: TimeBinFormat) -> Self {
        self.bin_format = bin_format;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn organize(&self, topic: &str, record: &Value, attempt: u32) -> Result<RecordOrganization> {
        let (key, value) = record_key_value(record)?;
        let time = extract_time(key, value);

        let project = sanitize_id(field(key, "projectId"), "unknown-project");
        let user = sanitize_id(field(key, "userId"), "unknown-user");
        let category = sanitize_id(field(key, "sourceId"), "unknown-source");

        let suffix = if attempt == 0 {
            String::new()
        } else {
            format!("_{attempt}")
        };
        let filename = format!("{}{}{}", self.time_bin(time), suffix, self.extension);

        let path = self.root.join(project).join(user).join(topic).join(filename);
        Ok(RecordOrganization {
            path,
            category,
            time,
        })
    }

    pub fn time_bin(&self, time: Option<DateTime<Utc>>) -> String {
        match time {
            Some(t) => self.bin_format.format(t),
            None => "unknown_date".to_string(),
        }
    }
}

/// Split a source record into its `key` and `value` sub-records.
pub fn record_key_value(record: &Value) -> Result<(&Value, &Value)> {
    let key = field(record, "key");
    let value = field(record, "value");
    match (key, value) {
        (Some(key @ Value::Record(_)), Some(value @ Value::Record(_))) => Ok((key, value)),
        _ => Err(Error::RecordMapping(
            "record has no key/value pair".to_string(),
        )),
    }
}

/// The record instant: the value's `time` field in floating seconds, or
/// the key's `start` field in integer millis for windowed aggregates.
pub fn extract_time(key: &Value, value: &Value) -> Option<DateTime<Utc>> {
    if let Some(Value::Double(seconds)) = field(value, "time") {
        return Utc
            .timestamp_millis_opt((seconds * 1000.0).round() as i64)
            .single();
    }
    if let Some(Value::Long(millis)) = field(key, "start") {
        return Utc.timestamp_millis_opt(*millis).single();
    }
    None
}

/// Look up a record field by name, resolving unions on both ends.
fn field<'a>(record: &'a Value, name: &str) -> Option<&'a Value> {
    let record = resolve(record);
    if let Value::Record(fields) = record {
        fields
            .iter()
            .find(|(field_name, _)| field_name == name)
            .map(|(_, value)| resolve(value))
    } else {
        None
    }
}

fn resolve(value: &Value) -> &Value {
    match value {
        Value::Union(_, inner) => resolve(inner),
        other => other,
    }
}

/// Strip every character outside `[A-Za-z0-9_-]`; empty results and
/// missing values fall back to the default.
pub fn sanitize_id(value: Option<&Value>, default: &str) -> String {
    let raw = match value {
        None | Some(Value::Null) => return default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Int(i)) => i.to_string(),
        Some(Value::Long(l)) => l.to_string(),
        Some(Value::Enum(_, symbol)) => symbol.clone(),
        Some(other) => format!("{other:?}"),
    };
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        default.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: Vec<(&str, Value)>) -> Value {
        Value::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }

    fn envelope(key: Vec<(&str, Value)>, value: Vec<(&str, Value)>) -> Value {
        record(vec![("key", record(key)), ("value", record(value))])
    }

    fn standard_key() -> Vec<(&'static str, Value)> {
        vec![
            ("projectId", Value::String("radar-test".to_string())),
            ("userId", Value::String("user1".to_string())),
            ("sourceId", Value::String("source1".to_string())),
        ]
    }

    #[test]
    fn test_hourly_bin_from_value_time() {
        // 1493711175 s = Tue 2017-05-02 07:46:15 UTC
        let rec = envelope(
            standard_key(),
            vec![("time", Value::Double(1_493_711_175.0))],
        );
        let factory = RecordPathFactory::new("/out", ".csv");
        let org = factory.organize("a", &rec, 0).unwrap();
        assert_eq!(
            org.path,
            PathBuf::from("/out/radar-test/user1/a/20170502_0700.csv")
        );
        assert_eq!(org.category, "source1");
    }

    #[test]
    fn test_windowed_key_start_takes_over() {
        let start_millis = (1_493_711_175 - 3600) * 1000;
        let mut key = standard_key();
        key.push(("start", Value::Long(start_millis)));
        let rec = envelope(key, vec![("x", Value::Int(1))]);

        let factory = RecordPathFactory::new("/out", ".csv");
        let org = factory.organize("a", &rec, 0).unwrap();
        assert!(org.path.ends_with("a/20170502_0600.csv"));
    }

    #[test]
    fn test_value_time_wins_over_key_start() {
        let mut key = standard_key();
        key.push(("start", Value::Long(0)));
        let rec = envelope(key, vec![("time", Value::Double(1_493_711_175.0))]);

        let factory = RecordPathFactory::new("/out", ".csv");
        let org = factory.organize("a", &rec, 0).unwrap();
        assert!(org.path.ends_with("20170502_0700.csv"));
    }

    #[test]
    fn test_missing_time_lands_in_unknown_date() {
        let rec = envelope(standard_key(), vec![("x", Value::Int(1))]);
        let factory = RecordPathFactory::new("/out", ".csv");
        let org = factory.organize("a", &rec, 0).unwrap();
        assert!(org.path.ends_with("a/unknown_date.csv"));
        assert!(org.time.is_none());
    }

    #[test]
    fn test_monthly_bin_format() {
        let rec = envelope(
            standard_key(),
            vec![("time", Value::Double(1_493_711_175.0))],
        );
        let factory =
            RecordPathFactory::new("/out", ".csv").with_bin_format(TimeBinFormat::Monthly);
        let org = factory.organize("a", &rec, 0).unwrap();
        assert!(org.path.ends_with("a/201705.csv"));
    }

    #[test]
    fn test_attempt_suffix() {
        let rec = envelope(
            standard_key(),
            vec![("time", Value::Double(1_493_711_175.0))],
        );
        let factory = RecordPathFactory::new("/out", ".csv.gz");
        assert!(factory
            .organize("a", &rec, 0)
            .unwrap()
            .path
            .ends_with("20170502_0700.csv.gz"));
        assert!(factory
            .organize("a", &rec, 1)
            .unwrap()
            .path
            .ends_with("20170502_0700_1.csv.gz"));
        assert!(factory
            .organize("a", &rec, 3)
            .unwrap()
            .path
            .ends_with("20170502_0700_3.csv.gz"));
    }

    #[test]
    fn test_sanitize_ids() {
        let rec = envelope(
            vec![
                ("projectId", Value::String("My Project!".to_string())),
                ("userId", Value::String("@@@".to_string())),
                ("sourceId", Value::Null),
            ],
            vec![("time", Value::Double(1_493_711_175.0))],
        );
        let factory = RecordPathFactory::new("/out", ".csv");
        let org = factory.organize("a", &rec, 0).unwrap();
        assert_eq!(
            org.path,
            PathBuf::from("/out/MyProject/unknown-user/a/20170502_0700.csv")
        );
        assert_eq!(org.category, "unknown-source");
    }

    #[test]
    fn test_union_wrapped_key_fields() {
        let rec = envelope(
            vec![
                (
                    "projectId",
                    Value::Union(1, Box::new(Value::String("p1".to_string()))),
                ),
                ("userId", Value::String("u1".to_string())),
                ("sourceId", Value::String("s1".to_string())),
            ],
            vec![("time", Value::Double(1_493_711_175.0))],
        );
        let factory = RecordPathFactory::new("/out", ".csv");
        let org = factory.organize("a", &rec, 0).unwrap();
        assert!(org.path.starts_with("/out/p1/u1"));
    }

    #[test]
    fn test_missing_key_or_value_is_mapping_error() {
        let factory = RecordPathFactory::new("/out", ".csv");
        let no_value = record(vec![("key", record(standard_key()))]);
        assert!(factory.organize("a", &no_value, 0).is_err());

        let scalar_key = record(vec![
            ("key", Value::Int(1)),
            ("value", record(vec![("x", Value::Int(1))])),
        ]);
        assert!(factory.organize("a", &scalar_key, 0).is_err());
    }

    #[test]
    fn test_time_bin_format_names() {
        assert_eq!(
            TimeBinFormat::from_name("hourly").unwrap(),
            TimeBinFormat::Hourly
        );
        assert_eq!(
            TimeBinFormat::from_name("MONTHLY").unwrap(),
            TimeBinFormat::Monthly
        );
        assert!(TimeBinFormat::from_name("weekly").is_err());
    }
}
