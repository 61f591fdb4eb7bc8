use std::collections::HashMap;

use crate::offset_range::OffsetRange;
use crate::range_set::OffsetRangeSet;
use crate::topic_partition::TopicPartition;

/// A single processed record: one offset of one topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub topic_partition: TopicPartition,
    pub offset: u64,
}

impl Transaction {
    pub fn new(topic_partition: TopicPartition, offset: u64) -> Self {
        Self {
            topic_partition,
            offset,
        }
    }
}

/// A UTC time window of one topic and source category, used as the
/// key of the output bins tally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bin {
    pub topic: String,
    pub category: String,
    pub time_bin: String,
}

impl Bin {
    pub fn new(
        topic: impl Into<String>,
        category: impl Into<String>,
        time_bin: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            category: category.into(),
            time_bin: time_bin.into(),
        }
    }
}

/// Offsets and bin counts staged by a writer but not yet committed to the
/// durable offset store. Each successful record write adds one transaction
/// as a singleton offset range plus one bin tick; the accountant later
/// merges the whole ledger in one go.
#[derive(Debug, Default)]
pub struct Ledger {
    offsets: OffsetRangeSet,
    bins: HashMap<Bin, u64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a processed record and its bin tick.
    pub fn add(&mut self, transaction: &Transaction, bin: Bin) {
        self.offsets.add(&OffsetRange::single(
            transaction.topic_partition.clone(),
            transaction.offset,
        ));
        *self.bins.entry(bin).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty() && self.bins.is_empty()
    }

    pub fn offsets(&self) -> &OffsetRangeSet {
        &self.offsets
    }

    pub fn bins(&self) -> &HashMap<Bin, u64> {
        &self.bins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp() -> TopicPartition {
        TopicPartition::new("t", 0)
    }

    fn bin() -> Bin {
        Bin::new("t", "source-1", "20170502_0700")
    }

    #[test]
    fn test_new_ledger_is_empty() {
        assert!(Ledger::new().is_empty());
    }

    #[test]
    fn test_add_stages_singleton_range() {
        let mut ledger = Ledger::new();
        ledger.add(&Transaction::new(tp(), 12), bin());
        assert!(!ledger.is_empty());
        assert!(ledger.offsets().contains_offset(&tp(), 12));
        assert!(!ledger.offsets().contains_offset(&tp(), 11));
    }

    #[test]
    fn test_consecutive_offsets_coalesce() {
        let mut ledger = Ledger::new();
        for offset in 0..5 {
            ledger.add(&Transaction::new(tp(), offset), bin());
        }
        assert_eq!(ledger.offsets().size(&tp()), 1);
        assert_eq!(ledger.bins()[&bin()], 5);
    }

    #[test]
    fn test_bins_count_per_key() {
        let mut ledger = Ledger::new();
        ledger.add(&Transaction::new(tp(), 0), bin());
        ledger.add(
            &Transaction::new(tp(), 1),
            Bin::new("t", "source-1", "20170502_0800"),
        );
        ledger.add(&Transaction::new(tp(), 2), bin());
        assert_eq!(ledger.bins().len(), 2);
        assert_eq!(ledger.bins()[&bin()], 2);
    }
}
