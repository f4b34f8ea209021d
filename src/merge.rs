//! Streaming k-way merge of anchor-sorted bins.
//!
//! Every round peeks all open bins, drains the ones parked on rejected
//! anchors, and takes one group from each bin positioned on the smallest
//! accepted anchor. Memory stays bounded by the number of open bins times the
//! size of one anchor group.

use anyhow::Result;
use std::io::Read;

use crate::anchor::{AnchorGroup, MergedAnchor, TargetListMerger};
use crate::bin_reader::BinReader;
use crate::errors::MergeError;
use crate::filter::{AcceptedAnchors, AnchorFilter};
use crate::record::Header;
use crate::summary::RunStats;

/// Header for the merged output: symbol lengths must agree across bins, the
/// sample id width is widened to the largest input width.
pub fn output_header<'a, I>(headers: I) -> Result<Header>
where
    I: IntoIterator<Item = (&'a str, &'a Header)>,
{
    let mut iter = headers.into_iter();
    let Some((first_path, first)) = iter.next() else {
        anyhow::bail!("at least one input bin must be specified");
    };
    let mut out = *first;
    for (path, header) in iter {
        let checks = [
            ("anchor", first.anchor_len_symbols, header.anchor_len_symbols),
            ("target", first.target_len_symbols, header.target_len_symbols),
            ("gap (lookahead)", first.gap_len_symbols, header.gap_len_symbols),
        ];
        for (field, a, b) in checks {
            if a != b {
                return Err(MergeError::InconsistentBins {
                    field,
                    first: a,
                    other: b,
                    first_path: first_path.to_string(),
                    other_path: path.to_string(),
                }
                .into());
            }
        }
        out.sample_id_size_bytes = out.sample_id_size_bytes.max(header.sample_id_size_bytes);
    }
    Ok(out)
}

pub struct StreamingMerge<R: Read> {
    bins: Vec<BinReader<R>>,
    /// Peeked anchor of `bins[i]` for the current round.
    top_anchors: Vec<u64>,
    groups: Vec<AnchorGroup>,
    n_groups: usize,
}

impl<R: Read> StreamingMerge<R> {
    pub fn new(bins: Vec<BinReader<R>>) -> Self {
        Self { bins, top_anchors: Vec::new(), groups: Vec::new(), n_groups: 0 }
    }

    pub fn n_open_bins(&self) -> usize {
        self.bins.len()
    }

    /// Peeks every bin, dropping exhausted ones and skipping rejected anchors.
    /// Returns false once no bin is left.
    fn collect_top_anchors(&mut self, accepted: &AcceptedAnchors) -> Result<bool> {
        self.top_anchors.clear();
        let mut bin_id = 0;
        while bin_id < self.bins.len() {
            match self.bins[bin_id].peek_anchor()? {
                None => {
                    self.bins.swap_remove(bin_id);
                }
                Some(anchor) if accepted.is_accepted(anchor) => {
                    self.top_anchors.push(anchor);
                    bin_id += 1;
                }
                Some(_) => self.bins[bin_id].skip()?,
            }
        }
        Ok(!self.bins.is_empty())
    }

    /// Groups of the next accepted anchor, in increasing anchor order.
    pub fn next_anchor(&mut self, accepted: &AcceptedAnchors) -> Result<Option<&[AnchorGroup]>> {
        if !self.collect_top_anchors(accepted)? {
            return Ok(None);
        }
        let min_anchor = self.top_anchors.iter().copied().min().unwrap_or_default();

        self.n_groups = 0;
        for (bin, &anchor) in self.bins.iter_mut().zip(&self.top_anchors) {
            if anchor != min_anchor {
                continue;
            }
            if self.groups.len() == self.n_groups {
                self.groups.push(AnchorGroup::default());
            }
            bin.take_group(&mut self.groups[self.n_groups])?;
            self.n_groups += 1;
        }
        Ok(Some(&self.groups[..self.n_groups]))
    }
}

/// Runs the streaming merge to completion, handing every anchor that passes
/// `filter` to `consume`.
pub fn merge_streaming<R, F>(
    bins: Vec<BinReader<R>>,
    accepted: &AcceptedAnchors,
    filter: &AnchorFilter,
    n_most_freq_targets_for_stats: usize,
    mut consume: F,
) -> Result<RunStats>
where
    R: Read,
    F: FnMut(&MergedAnchor) -> Result<()>,
{
    let mut stats = RunStats::default();
    let mut merge = StreamingMerge::new(bins);
    let mut merger = TargetListMerger::new();
    let mut merged = MergedAnchor::default();

    while let Some(groups) = merge.next_anchor(accepted)? {
        merger.merge(groups, n_most_freq_targets_for_stats, &mut merged);
        if filter.filtered_out(&merged.counts) {
            stats.anchor_filtered_out();
            continue;
        }
        consume(&merged)?;
        stats.anchor_written(&merged);
    }
    Ok(stats)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bin_reader::tests::{encode_bin, rec};
    use crate::record::tests::test_header;
    use crate::record::Record;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use std::io::Cursor;

    pub(crate) fn bins_from(records: &[Vec<Record>]) -> Vec<BinReader<Cursor<Vec<u8>>>> {
        records
            .iter()
            .enumerate()
            .map(|(i, recs)| {
                let bytes = encode_bin(&test_header(), recs);
                BinReader::new(Cursor::new(bytes), format!("bin{i}")).unwrap()
            })
            .collect()
    }

    /// One single-sample bin per sample id, each sorted by (anchor, target).
    pub(crate) fn random_bins(rng: &mut StdRng, n_bins: u64) -> Vec<Vec<Record>> {
        (0..n_bins)
            .map(|sample_id| {
                let mut keys: Vec<(u64, u64)> = (0..rng.gen_range(0..40))
                    .map(|_| (rng.gen_range(0..15), rng.gen_range(0..6)))
                    .collect();
                keys.sort_unstable();
                keys.dedup();
                keys.into_iter()
                    .map(|(anchor, target)| rec(anchor, target, sample_id, rng.gen_range(1..20)))
                    .collect()
            })
            .collect()
    }

    fn collect(
        records: &[Vec<Record>],
        accepted: &AcceptedAnchors,
        filter: &AnchorFilter,
    ) -> (Vec<MergedAnchor>, RunStats) {
        let mut out = Vec::new();
        let stats = merge_streaming(bins_from(records), accepted, filter, 0, |m| {
            out.push(m.clone());
            Ok(())
        })
        .unwrap();
        (out, stats)
    }

    #[test]
    fn test_two_bins_same_anchor() {
        let records = vec![vec![rec(7, 3, 0, 2)], vec![rec(7, 3, 1, 5)]];
        let (out, stats) = collect(&records, &AcceptedAnchors::accept_all(), &AnchorFilter::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].anchor, 7);
        assert_eq!(out[0].counts.tot_cnt, 7);
        assert_eq!(out[0].counts.n_unique_targets, 1);
        assert_eq!(out[0].counts.n_unique_samples, 2);
        assert_eq!(stats.tot_written_anchors, 1);
        assert_eq!(stats.tot_written_records, 2);
    }

    #[test]
    fn test_allow_list_skips_rejected_anchors() {
        let records = vec![vec![rec(3, 1, 0, 1), rec(3, 2, 0, 1), rec(5, 1, 0, 4), rec(9, 1, 0, 1)]];
        let accepted = AcceptedAnchors::from_anchors([5]);
        let (out, _) = collect(&records, &accepted, &AnchorFilter::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].anchor, 5);
        assert_eq!(out[0].counts.tot_cnt, 4);
    }

    #[test]
    fn test_bins_at_larger_anchor_wait() {
        let mut merge = StreamingMerge::new(bins_from(&[
            vec![rec(1, 1, 0, 1), rec(4, 1, 0, 1)],
            vec![rec(4, 2, 1, 1)],
            vec![],
        ]));
        let accepted = AcceptedAnchors::accept_all();
        let groups = merge.next_anchor(&accepted).unwrap().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].anchor, 1);
        assert_eq!(merge.n_open_bins(), 2);
        let groups = merge.next_anchor(&accepted).unwrap().unwrap();
        assert_eq!(groups.iter().map(|g| g.sample_id).collect::<Vec<_>>(), vec![0, 1]);
        assert!(merge.next_anchor(&accepted).unwrap().is_none());
        assert_eq!(merge.n_open_bins(), 0);
    }

    #[test]
    fn test_threshold_filter_counts_rejections() {
        let records = vec![vec![rec(1, 1, 0, 10), rec(2, 1, 0, 11)]];
        let filter = AnchorFilter { count_threshold: 10, ..Default::default() };
        let (out, stats) = collect(&records, &AcceptedAnchors::accept_all(), &filter);
        assert_eq!(out.iter().map(|m| m.anchor).collect::<Vec<_>>(), vec![2]);
        assert_eq!(stats.tot_filtered_out_anchors, 1);
    }

    #[test]
    fn test_output_header_widens_sample_id() {
        let a = test_header();
        let mut b = a;
        b.sample_id_size_bytes = 3;
        let header = output_header([("a", &a), ("b", &b)]).unwrap();
        assert_eq!(header.sample_id_size_bytes, 3);
        assert_eq!(header.anchor_size_bytes, a.anchor_size_bytes);
    }

    #[test]
    fn test_output_header_rejects_mismatched_lengths() {
        let a = test_header();
        let mut b = a;
        b.gap_len_symbols = 2;
        let err = output_header([("a", &a), ("b", &b)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MergeError>(),
            Some(MergeError::InconsistentBins { field: "gap (lookahead)", .. })
        ));
    }

    #[test]
    fn test_random_ordering_and_completeness() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let n_bins = rng.gen_range(1..6);
            let records = random_bins(&mut rng, n_bins);
            let accepted_set: Vec<u64> = (0..15).filter(|_| rng.gen_bool(0.6)).collect();
            let accepted = AcceptedAnchors::from_anchors(accepted_set.iter().copied());
            let (out, _) = collect(&records, &accepted, &AnchorFilter::default());

            assert!(out.windows(2).all(|w| w[0].anchor < w[1].anchor));

            let mut expected: BTreeMap<u64, u64> = BTreeMap::new();
            for r in records.iter().flatten().filter(|r| accepted.is_accepted(r.anchor)) {
                *expected.entry(r.anchor).or_default() += 1;
            }
            let found: BTreeMap<u64, u64> =
                out.iter().map(|m| (m.anchor, m.data.len() as u64)).collect();
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn test_filter_monotonicity() {
        let mut rng = StdRng::seed_from_u64(11);
        let records = random_bins(&mut rng, 5);
        let accepted = AcceptedAnchors::accept_all();
        let mut prev = usize::MAX;
        for threshold in 0..30 {
            let filter = AnchorFilter { count_threshold: threshold, ..Default::default() };
            let (out, _) = collect(&records, &accepted, &filter);
            assert!(out.len() <= prev);
            prev = out.len();
        }
        let mut prev = usize::MAX;
        for threshold in 0..6 {
            let filter = AnchorFilter { samples_threshold: threshold, ..Default::default() };
            let (out, _) = collect(&records, &accepted, &filter);
            assert!(out.len() <= prev);
            prev = out.len();
        }
        let mut prev = usize::MAX;
        for threshold in 0..8 {
            let filter =
                AnchorFilter { unique_targets_threshold: threshold, ..Default::default() };
            let (out, _) = collect(&records, &accepted, &filter);
            assert!(out.len() <= prev);
            assert!(out.iter().all(|m| m.counts.n_unique_targets > threshold));
            prev = out.len();
        }
    }
}
