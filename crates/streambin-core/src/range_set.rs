use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::offset_range::OffsetRange;
use crate::topic_partition::TopicPartition;

/// Set of processed offset ranges, kept canonical per topic partition.
///
/// Each partition maps to a sorted list of disjoint intervals. Adding a
/// range merges it with any overlapping or adjacent stored ranges, so after
/// every mutation consecutive intervals `r1`, `r2` satisfy
/// `r1.to + 1 < r2.from`. Loading a legacy store with overlapping rows
/// therefore self-heals into the canonical form.
///
/// The set itself is not thread safe; the accountant owns it behind a lock.
#[derive(Debug, Clone, Default)]
pub struct OffsetRangeSet {
    partitions: HashMap<TopicPartition, Vec<Interval>>,
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    from: u64,
    to: u64,
    last_processed: DateTime<Utc>,
}

impl OffsetRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a range, merging with overlapping or adjacent stored ranges.
    /// The merged interval keeps the latest `last_processed` stamp of all
    /// participants.
    pub fn add(&mut self, range: &OffsetRange) {
        let list = self
            .partitions
            .entry(range.topic_partition.clone())
            .or_default();

        let mut merged = Interval {
            from: range.offset_from,
            to: range.offset_to,
            last_processed: range.last_processed,
        };

        // First interval starting strictly after the new range.
        let idx = list.partition_point(|iv| iv.from <= merged.from);
        let mut insert_at = idx;

        // Merge with the left neighbour when overlapping or adjacent.
        if idx > 0 && list[idx - 1].to.saturating_add(1) >= merged.from {
            let left = list.remove(idx - 1);
            merged.from = left.from;
            merged.to = merged.to.max(left.to);
            merged.last_processed = merged.last_processed.max(left.last_processed);
            insert_at = idx - 1;
        }

        // Absorb right neighbours while they still touch the merged range.
        while insert_at < list.len() && list[insert_at].from <= merged.to.saturating_add(1) {
            let right = list.remove(insert_at);
            merged.to = merged.to.max(right.to);
            merged.last_processed = merged.last_processed.max(right.last_processed);
        }

        list.insert(insert_at, merged);
    }

    /// Add a single offset for the given topic partition.
    pub fn add_offset(&mut self, topic_partition: &TopicPartition, offset: u64) {
        self.add(&OffsetRange::single(topic_partition.clone(), offset));
    }

    /// Merge all ranges of `other` into this set.
    pub fn add_all(&mut self, other: &OffsetRangeSet) {
        for range in other.ranges() {
            self.add(&range);
        }
    }

    /// Whether `range` is fully covered by a single stored interval.
    pub fn contains(&self, range: &OffsetRange) -> bool {
        let Some(list) = self.partitions.get(&range.topic_partition) else {
            return false;
        };
        let idx = list.partition_point(|iv| iv.from <= range.offset_from);
        idx > 0 && list[idx - 1].to >= range.offset_to
    }

    /// Whether a single offset of the given topic partition is covered.
    pub fn contains_offset(&self, topic_partition: &TopicPartition, offset: u64) -> bool {
        self.contains(&OffsetRange::single(topic_partition.clone(), offset))
    }

    /// Number of stored intervals for the given topic partition.
    pub fn size(&self, topic_partition: &TopicPartition) -> usize {
        self.partitions
            .get(topic_partition)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(Vec::is_empty)
    }

    /// All stored ranges, sorted by topic partition and offset.
    pub fn ranges(&self) -> Vec<OffsetRange> {
        let mut keys: Vec<&TopicPartition> = self.partitions.keys().collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|tp| {
                self.partitions[tp].iter().map(move |iv| OffsetRange {
                    topic_partition: tp.clone(),
                    offset_from: iv.from,
                    offset_to: iv.to,
                    last_processed: iv.last_processed,
                })
            })
            .collect()
    }
}

impl PartialEq for OffsetRangeSet {
    fn eq(&self, other: &Self) -> bool {
        self.ranges() == other.ranges()
    }
}

impl Eq for OffsetRangeSet {}

impl std::fmt::Display for OffsetRangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ranges = self.ranges();
        write!(f, "[")?;
        for (i, range) in ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{range}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(name: &str) -> OffsetRange {
        OffsetRange::parse_filename(name).unwrap()
    }

    fn tp(topic: &str, partition: u32) -> TopicPartition {
        TopicPartition::new(topic, partition)
    }

    // ---------------------------------------------------------------
    // Canonicalization
    // ---------------------------------------------------------------

    #[test]
    fn test_add_disjoint() {
        let mut set = OffsetRangeSet::new();
        set.add(&range("a+0+0+1"));
        set.add(&range("a+0+4+4"));
        assert_eq!(set.size(&tp("a", 0)), 2);
    }

    #[test]
    fn test_add_overlapping_and_adjacent_merge() {
        // a+0+0+1, a+0+1+2, a+0+4+4 canonicalize to [0,2] and [4,4].
        let mut set = OffsetRangeSet::new();
        set.add(&range("a+0+0+1"));
        set.add(&range("a+0+1+2"));
        set.add(&range("a+0+4+4"));
        assert_eq!(set.size(&tp("a", 0)), 2);
        assert!(set.contains(&range("a+0+0+2")));
        assert!(set.contains(&range("a+0+4+4")));
        assert!(!set.contains(&range("a+0+0+3")));
        assert!(!set.contains(&range("a+0+2+3")));
    }

    #[test]
    fn test_adjacent_ranges_merge() {
        let mut set = OffsetRangeSet::new();
        set.add(&range("a+0+0+1"));
        set.add(&range("a+0+2+3"));
        assert_eq!(set.size(&tp("a", 0)), 1);
        assert!(set.contains(&range("a+0+0+3")));
    }

    #[test]
    fn test_range_absorbs_multiple_right_neighbours() {
        let mut set = OffsetRangeSet::new();
        set.add(&range("a+0+0+1"));
        set.add(&range("a+0+4+5"));
        set.add(&range("a+0+8+9"));
        assert_eq!(set.size(&tp("a", 0)), 3);
        // Bridges all three stored intervals at once.
        set.add(&range("a+0+1+8"));
        assert_eq!(set.size(&tp("a", 0)), 1);
        assert!(set.contains(&range("a+0+0+9")));
    }

    #[test]
    fn test_order_independence() {
        let names = ["a+0+10+12", "a+0+0+1", "a+0+2+4", "a+0+6+6", "a+0+5+5"];

        let mut forward = OffsetRangeSet::new();
        for name in names {
            forward.add(&range(name));
        }
        let mut backward = OffsetRangeSet::new();
        for name in names.iter().rev() {
            backward.add(&range(name));
        }
        assert_eq!(forward, backward);
        assert_eq!(forward.size(&tp("a", 0)), 2);
    }

    #[test]
    fn test_invariant_non_adjacent_after_mutation() {
        let mut set = OffsetRangeSet::new();
        for offset in [9u64, 1, 5, 3, 7, 2, 8, 0, 4, 6] {
            set.add_offset(&tp("a", 0), offset);
        }
        assert_eq!(set.size(&tp("a", 0)), 1);
        assert!(set.contains(&range("a+0+0+9")));

        let ranges = set.ranges();
        for pair in ranges.windows(2) {
            assert!(pair[0].offset_to + 1 < pair[1].offset_from);
        }
    }

    // ---------------------------------------------------------------
    // Containment
    // ---------------------------------------------------------------

    #[test]
    fn test_contains_added_range_and_subranges() {
        let mut set = OffsetRangeSet::new();
        set.add(&range("a+0+10+20"));
        assert!(set.contains(&range("a+0+10+20")));
        assert!(set.contains(&range("a+0+12+15")));
        assert!(set.contains_offset(&tp("a", 0), 10));
        assert!(set.contains_offset(&tp("a", 0), 20));
        assert!(!set.contains_offset(&tp("a", 0), 9));
        assert!(!set.contains_offset(&tp("a", 0), 21));
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut set = OffsetRangeSet::new();
        set.add(&range("a+0+0+1"));
        assert!(!set.contains(&range("a+1+0+1")));
        assert!(!set.contains(&range("b+0+0+1")));
        assert_eq!(set.size(&tp("a", 1)), 0);
    }

    #[test]
    fn test_contains_never_spans_gap() {
        let mut set = OffsetRangeSet::new();
        set.add(&range("a+0+0+2"));
        set.add(&range("a+0+4+4"));
        // [0,4] is not covered by a single stored interval.
        assert!(!set.contains(&range("a+0+0+4")));
    }

    // ---------------------------------------------------------------
    // add_all / equality
    // ---------------------------------------------------------------

    #[test]
    fn test_add_all() {
        let mut a = OffsetRangeSet::new();
        a.add(&range("a+0+0+1"));
        let mut b = OffsetRangeSet::new();
        b.add(&range("a+0+2+3"));
        b.add(&range("b+0+0+0"));

        a.add_all(&b);
        assert_eq!(a.size(&tp("a", 0)), 1);
        assert!(a.contains(&range("a+0+0+3")));
        assert!(a.contains(&range("b+0+0+0")));
    }

    #[test]
    fn test_empty() {
        let set = OffsetRangeSet::new();
        assert!(set.is_empty());
        assert!(set.ranges().is_empty());
    }

    #[test]
    fn test_merge_keeps_latest_processed_stamp() {
        let mut early = range("a+0+0+1");
        early.last_processed = DateTime::<Utc>::MIN_UTC;
        let late = range("a+0+2+3");

        let mut set = OffsetRangeSet::new();
        set.add(&early);
        set.add(&late);

        let merged = &set.ranges()[0];
        assert_eq!(merged.last_processed, late.last_processed);
    }
}
