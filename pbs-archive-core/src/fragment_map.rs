//! In-memory table of per-entry byte-range coverage (spec §2 item 1, §3
//! "Fragment node").
//!
//! One [`FragmentNode`] tracks the set of non-overlapping byte ranges that
//! have been written for a single archive entry so far. A node is created
//! on the first range insert for an entry and discarded once it is
//! complete, matching the "created on first range insert ... discarded
//! once complete" lifecycle in the data model table.

use std::collections::BTreeMap;

/// A half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Per-entry byte-range coverage. Ranges are kept disjoint by merging on
/// insert, keyed by range start so overlap checks are a simple neighbor
/// scan instead of a full sweep.
#[derive(Debug, Default)]
pub struct FragmentNode {
    pub name: String,
    pub total_size: u64,
    ranges: BTreeMap<u64, u64>, // start -> end
}

impl FragmentNode {
    pub fn new(name: impl Into<String>, total_size: u64) -> Self {
        Self {
            name: name.into(),
            total_size,
            ranges: BTreeMap::new(),
        }
    }

    /// Insert a range, merging with any overlapping or adjacent neighbors
    /// so the set stays disjoint.
    pub fn insert(&mut self, range: ByteRange) {
        if range.is_empty() {
            return;
        }

        let mut start = range.start;
        let mut end = range.end;

        // Merge with the predecessor that starts at or before `start`.
        if let Some((&pstart, &pend)) = self.ranges.range(..=start).next_back() {
            if pend >= start {
                start = start.min(pstart);
                end = end.max(pend);
                self.ranges.remove(&pstart);
            }
        }

        // Merge with every successor overlapping or touching the new range.
        let to_remove: Vec<u64> = self
            .ranges
            .range(start..=end)
            .map(|(&s, _)| s)
            .collect();
        for s in to_remove {
            if let Some(e) = self.ranges.remove(&s) {
                end = end.max(e);
            }
        }

        self.ranges.insert(start, end);
    }

    /// Total number of bytes covered by all disjoint ranges.
    pub fn covered_size(&self) -> u64 {
        self.ranges.values().zip(self.ranges.keys()).fold(
            0u64,
            |acc, (&end, &start)| acc + (end - start),
        )
    }

    /// Complete iff `coveredSize == totalSize` (when `totalSize > 0`).
    pub fn is_complete(&self) -> bool {
        if self.total_size == 0 {
            return true;
        }
        self.covered_size() == self.total_size
    }

    /// Ranges in ascending order, for invariant checks and tests.
    pub fn ranges(&self) -> Vec<ByteRange> {
        self.ranges
            .iter()
            .map(|(&start, &end)| ByteRange { start, end })
            .collect()
    }
}

/// Shared map of entry name to in-progress fragment coverage. Guarded by
/// the caller (the progress lock in spec §5), so this type itself has no
/// internal locking.
#[derive(Debug, Default)]
pub struct FragmentMap {
    nodes: std::collections::HashMap<String, FragmentNode>,
}

impl FragmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment write; creates the node on first insert. Checking
    /// completion and discarding the node happen under this same call so
    /// that, for a file whose fragments are handled by different workers,
    /// exactly one caller observes `true` -- never two workers racing a
    /// separate `is_complete`-then-`discard` pair for the same entry.
    ///
    /// Returns whether this call completed the node.
    pub fn record(&mut self, name: &str, total_size: u64, range: ByteRange) -> bool {
        let node = self
            .nodes
            .entry(name.to_string())
            .or_insert_with(|| FragmentNode::new(name, total_size));
        node.insert(range);
        if node.is_complete() {
            self.nodes.remove(name);
            true
        } else {
            false
        }
    }

    /// True if the entry is fully covered. An entry never recorded is not
    /// complete; an entry already completed (and thus discarded by
    /// `record`) also reads as not complete, since it is no longer
    /// in-progress.
    pub fn is_complete(&self, name: &str) -> bool {
        self.nodes.get(name).map(|n| n.is_complete()).unwrap_or(false)
    }

    /// Discard the node, e.g. on early termination of a fragment that
    /// will never complete. A normal completion is already discarded by
    /// `record`.
    pub fn discard(&mut self, name: &str) {
        self.nodes.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&FragmentNode> {
        self.nodes.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_ranges_merge() {
        let mut node = FragmentNode::new("a", 10);
        node.insert(ByteRange::new(0, 4));
        node.insert(ByteRange::new(4, 4));
        node.insert(ByteRange::new(8, 2));
        assert!(node.is_complete());
        assert_eq!(node.covered_size(), 10);
        assert_eq!(node.ranges().len(), 1);
    }

    #[test]
    fn out_of_order_fragments_still_complete() {
        let mut node = FragmentNode::new("a", 10);
        node.insert(ByteRange::new(8, 2));
        node.insert(ByteRange::new(0, 4));
        node.insert(ByteRange::new(4, 4));
        assert!(node.is_complete());
    }

    #[test]
    fn incomplete_when_gap_remains() {
        let mut node = FragmentNode::new("a", 10);
        node.insert(ByteRange::new(0, 4));
        node.insert(ByteRange::new(8, 2));
        assert!(!node.is_complete());
        assert_eq!(node.covered_size(), 6);
    }

    #[test]
    fn zero_size_entry_is_complete() {
        let node = FragmentNode::new("empty", 0);
        assert!(node.is_complete());
    }

    #[test]
    fn record_discards_node_on_completion() {
        let mut map = FragmentMap::new();
        // The node is gone as soon as the completing call returns, so a
        // second, duplicate insert for the same range starts a fresh node
        // rather than double-reporting completion.
        assert!(map.record("a", 4, ByteRange::new(0, 4)));
        assert!(!map.is_complete("a"));
    }

    #[test]
    fn record_reports_completion_only_on_final_fragment() {
        let mut map = FragmentMap::new();
        assert!(!map.record("a", 10, ByteRange::new(0, 4)));
        assert!(!map.record("a", 10, ByteRange::new(4, 4)));
        assert!(map.record("a", 10, ByteRange::new(8, 2)));
        assert!(!map.is_complete("a"));
    }

    #[test]
    fn discard_removes_an_incomplete_node() {
        let mut map = FragmentMap::new();
        assert!(!map.record("a", 10, ByteRange::new(0, 4)));
        map.discard("a");
        assert!(!map.is_complete("a"));
    }
}
