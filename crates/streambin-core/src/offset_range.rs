use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::topic_partition::TopicPartition;

/// An inclusive range `[offset_from, offset_to]` of offsets in one topic
/// partition, stamped with the time it was last processed.
///
/// Ranges are parsed from source filenames of the form
/// `topic+partition+offsetFrom+offsetTo.ext`. The `last_processed` stamp is
/// bookkeeping only: equality, ordering and hashing ignore it.
#[derive(Debug, Clone)]
pub struct OffsetRange {
    pub topic_partition: TopicPartition,
    pub offset_from: u64,
    pub offset_to: u64,
    pub last_processed: DateTime<Utc>,
}

impl OffsetRange {
    pub fn new(topic_partition: TopicPartition, offset_from: u64, offset_to: u64) -> Result<Self> {
        if offset_from > offset_to {
            return Err(Error::InvalidRange {
                from: offset_from,
                to: offset_to,
            });
        }
        Ok(Self {
            topic_partition,
            offset_from,
            offset_to,
            last_processed: Utc::now(),
        })
    }

    /// A range covering a single offset.
    pub fn single(topic_partition: TopicPartition, offset: u64) -> Self {
        Self {
            topic_partition,
            offset_from: offset,
            offset_to: offset,
            last_processed: Utc::now(),
        }
    }

    /// Parse a range from a source filename such as `a+0+0+1.avro`.
    ///
    /// The extension is optional; anything after the first `.` in the last
    /// segment is ignored.
    pub fn parse_filename(filename: &str) -> Result<Self> {
        let invalid = || Error::InvalidFilename(filename.to_string());

        let mut parts = filename.split('+');
        let topic = parts.next().filter(|t| !t.is_empty()).ok_or_else(invalid)?;
        let partition = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let offset_from = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let last = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        let offset_to = last
            .split('.')
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(invalid)?;

        OffsetRange::new(TopicPartition::new(topic, partition), offset_from, offset_to)
            .map_err(|_| invalid())
    }

    pub fn topic(&self) -> &str {
        &self.topic_partition.topic
    }

    pub fn partition(&self) -> u32 {
        self.topic_partition.partition
    }

    /// Number of offsets covered by this range.
    pub fn size(&self) -> u64 {
        self.offset_to - self.offset_from + 1
    }

    pub fn contains(&self, other: &OffsetRange) -> bool {
        self.topic_partition == other.topic_partition
            && self.offset_from <= other.offset_from
            && other.offset_to <= self.offset_to
    }
}

impl std::fmt::Display for OffsetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}+{}+{}+{}",
            self.topic_partition.topic, self.topic_partition.partition, self.offset_from,
            self.offset_to
        )
    }
}

impl PartialEq for OffsetRange {
    fn eq(&self, other: &Self) -> bool {
        self.topic_partition == other.topic_partition
            && self.offset_from == other.offset_from
            && self.offset_to == other.offset_to
    }
}

impl Eq for OffsetRange {}

impl Hash for OffsetRange {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.topic_partition.hash(state);
        self.offset_from.hash(state);
        self.offset_to.hash(state);
    }
}

impl PartialOrd for OffsetRange {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OffsetRange {
    fn cmp(&self, other: &Self) -> Ordering {
        self.offset_from
            .cmp(&other.offset_from)
            .then_with(|| self.offset_to.cmp(&other.offset_to))
            .then_with(|| self.topic_partition.cmp(&other.topic_partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filename() {
        let range = OffsetRange::parse_filename("a+0+0+1.avro").unwrap();
        assert_eq!(range.topic(), "a");
        assert_eq!(range.partition(), 0);
        assert_eq!(range.offset_from, 0);
        assert_eq!(range.offset_to, 1);
    }

    #[test]
    fn test_parse_filename_without_extension() {
        let range = OffsetRange::parse_filename("a+0+4+4").unwrap();
        assert_eq!(range.offset_from, 4);
        assert_eq!(range.offset_to, 4);
    }

    #[test]
    fn test_parse_filename_topic_with_separators() {
        let range = OffsetRange::parse_filename("android_phone_light+12+500+1000.avro").unwrap();
        assert_eq!(range.topic(), "android_phone_light");
        assert_eq!(range.partition(), 12);
        assert_eq!(range.size(), 501);
    }

    #[test]
    fn test_parse_filename_invalid() {
        assert!(OffsetRange::parse_filename("nonsense.avro").is_err());
        assert!(OffsetRange::parse_filename("a+x+0+1.avro").is_err());
        assert!(OffsetRange::parse_filename("a+0+1.avro").is_err());
        assert!(OffsetRange::parse_filename("a+0+0+1+2.avro").is_err());
        assert!(OffsetRange::parse_filename("+0+0+1.avro").is_err());
        // from > to never parses into a valid range
        assert!(OffsetRange::parse_filename("a+0+2+1.avro").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let range = OffsetRange::parse_filename("a+1+100+200.avro").unwrap();
        let reparsed = OffsetRange::parse_filename(&range.to_string()).unwrap();
        assert_eq!(range, reparsed);
    }

    #[test]
    fn test_equality_ignores_last_processed() {
        let mut a = OffsetRange::parse_filename("a+0+0+1").unwrap();
        let b = OffsetRange::parse_filename("a+0+0+1").unwrap();
        a.last_processed = DateTime::<Utc>::MIN_UTC;
        assert_eq!(a, b);
    }

    #[test]
    fn test_contains() {
        let outer = OffsetRange::parse_filename("a+0+0+10").unwrap();
        assert!(outer.contains(&OffsetRange::parse_filename("a+0+0+10").unwrap()));
        assert!(outer.contains(&OffsetRange::parse_filename("a+0+3+7").unwrap()));
        assert!(!outer.contains(&OffsetRange::parse_filename("a+0+3+11").unwrap()));
        assert!(!outer.contains(&OffsetRange::parse_filename("a+1+3+7").unwrap()));
        assert!(!outer.contains(&OffsetRange::parse_filename("b+0+3+7").unwrap()));
    }

    #[test]
    fn test_ordering() {
        let mut ranges = vec![
            OffsetRange::parse_filename("a+0+4+4").unwrap(),
            OffsetRange::parse_filename("a+0+0+2").unwrap(),
            OffsetRange::parse_filename("a+0+0+1").unwrap(),
        ];
        ranges.sort();
        assert_eq!(ranges[0], OffsetRange::parse_filename("a+0+0+1").unwrap());
        assert_eq!(ranges[1], OffsetRange::parse_filename("a+0+0+2").unwrap());
        assert_eq!(ranges[2], OffsetRange::parse_filename("a+0+4+4").unwrap());
    }

    #[test]
    fn test_single() {
        let range = OffsetRange::single(TopicPartition::new("t", 3), 42);
        assert_eq!(range.offset_from, 42);
        assert_eq!(range.offset_to, 42);
        assert_eq!(range.size(), 1);
    }
}
