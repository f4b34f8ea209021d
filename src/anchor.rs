//! Per-anchor containers and the target-list merger.
//!
//! A bin yields one [`AnchorGroup`] per anchor: the records of a single sample,
//! sorted by target. The [`TargetListMerger`] fans several groups for the same
//! anchor into one [`MergedAnchor`] whose entries keep a global target order,
//! the way an external merge sort fans in its sorted runs.

use indexmap::IndexSet;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// `(sample_id, barcode)`; the barcode is 0 outside single-cell data.
pub type SampleKey = (u64, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetCount {
    pub target: u64,
    pub barcode: u64,
    pub count: u64,
}

/// Records of one bin sharing an anchor and a sample id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorGroup {
    pub anchor: u64,
    pub sample_id: u64,
    pub data: Vec<TargetCount>,
}

impl AnchorGroup {
    pub fn clear(&mut self) {
        self.anchor = 0;
        self.sample_id = 0;
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One cell of the anchor's contingency table. Derived ordering is
/// `(target, sample_id, barcode, count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnchorEntry {
    pub target: u64,
    pub sample_id: u64,
    pub barcode: u64,
    pub count: u64,
}

/// Totals before and after the most-frequent-targets truncation.
///
/// Counts saturate at `u64::MAX` instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnchorCounts {
    pub tot_cnt_before_filter: u64,
    pub n_unique_targets_before_filter: u64,
    pub tot_cnt: u64,
    pub n_unique_targets: u64,
    pub n_unique_samples: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MergedAnchor {
    pub anchor: u64,
    pub data: Vec<AnchorEntry>,
    pub counts: AnchorCounts,
    /// Distinct samples among the kept entries, in order of first appearance.
    pub samples: IndexSet<SampleKey>,
    prev_target: Option<u64>,
    target_totals: Vec<(u64, u64)>,
    kept_targets: Vec<u64>,
}

impl MergedAnchor {
    /// Resets the anchor for reuse, keeping allocated capacity.
    pub fn start(&mut self, anchor: u64) {
        self.anchor = anchor;
        self.data.clear();
        self.samples.clear();
        self.counts = AnchorCounts::default();
        self.prev_target = None;
    }

    /// Appends an entry; entries must arrive in target order.
    pub fn push(&mut self, entry: AnchorEntry) {
        debug_assert!(self.prev_target.map_or(true, |t| t <= entry.target));
        if self.prev_target != Some(entry.target) {
            self.prev_target = Some(entry.target);
            self.counts.n_unique_targets_before_filter += 1;
        }
        self.counts.tot_cnt_before_filter =
            self.counts.tot_cnt_before_filter.saturating_add(entry.count);
        self.data.push(entry);
    }

    /// Applies the optional truncation to the `n_most_freq_targets` most
    /// frequent targets (0 keeps all) and computes the kept counts.
    pub fn finish(&mut self, n_most_freq_targets: usize) {
        if n_most_freq_targets > 0
            && self.counts.n_unique_targets_before_filter > n_most_freq_targets as u64
        {
            self.truncate_targets(n_most_freq_targets);
        }

        let mut tot_cnt = 0u64;
        let mut n_unique_targets = 0u64;
        let mut prev = None;
        for entry in &self.data {
            if prev != Some(entry.target) {
                prev = Some(entry.target);
                n_unique_targets += 1;
            }
            tot_cnt = tot_cnt.saturating_add(entry.count);
            self.samples.insert((entry.sample_id, entry.barcode));
        }
        self.counts.tot_cnt = tot_cnt;
        self.counts.n_unique_targets = n_unique_targets;
        self.counts.n_unique_samples = self.samples.len() as u64;
    }

    fn truncate_targets(&mut self, keep: usize) {
        self.target_totals.clear();
        for entry in &self.data {
            match self.target_totals.last_mut() {
                Some((target, total)) if *target == entry.target => {
                    *total = total.saturating_add(entry.count)
                }
                _ => self.target_totals.push((entry.target, entry.count)),
            }
        }

        // most frequent first, ties by smaller target
        let by_rank = |a: &(u64, u64), b: &(u64, u64)| -> Ordering {
            b.1.cmp(&a.1).then(a.0.cmp(&b.0))
        };
        if keep < self.target_totals.len() {
            self.target_totals.select_nth_unstable_by(keep - 1, by_rank);
            self.target_totals.truncate(keep);
        }

        self.kept_targets.clear();
        self.kept_targets.extend(self.target_totals.iter().map(|&(target, _)| target));
        self.kept_targets.sort_unstable();
        let kept = &self.kept_targets;
        self.data.retain(|entry| kept.binary_search(&entry.target).is_ok());
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    target: u64,
    sample_id: u64,
    barcode: u64,
    group_idx: usize,
    pos: usize,
}

/// K-way merge of target-sorted groups sharing one anchor.
///
/// Ties on target are broken by `(sample_id, barcode)` and then by group
/// order, so the result matches a global sort of the same records.
#[derive(Debug, Default)]
pub struct TargetListMerger {
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

impl TargetListMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(
        &mut self,
        groups: &[AnchorGroup],
        n_most_freq_targets: usize,
        merged: &mut MergedAnchor,
    ) {
        let anchor = groups.first().map_or(0, |g| g.anchor);
        debug_assert!(groups.iter().all(|g| g.anchor == anchor));
        merged.start(anchor);

        self.heap.clear();
        for (group_idx, group) in groups.iter().enumerate() {
            if let Some(first) = group.data.first() {
                self.heap.push(Reverse(HeapEntry {
                    target: first.target,
                    sample_id: group.sample_id,
                    barcode: first.barcode,
                    group_idx,
                    pos: 0,
                }));
            }
        }

        while let Some(Reverse(top)) = self.heap.pop() {
            let group = &groups[top.group_idx];
            let tc = group.data[top.pos];
            merged.push(AnchorEntry {
                target: tc.target,
                sample_id: group.sample_id,
                barcode: tc.barcode,
                count: tc.count,
            });
            let next = top.pos + 1;
            if let Some(tc) = group.data.get(next) {
                self.heap.push(Reverse(HeapEntry {
                    target: tc.target,
                    sample_id: group.sample_id,
                    barcode: tc.barcode,
                    group_idx: top.group_idx,
                    pos: next,
                }));
            }
        }

        merged.finish(n_most_freq_targets);
    }
}
