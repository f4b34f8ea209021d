//! Whole-corpus assembly: load every accepted record, sort globally, group.
//!
//! This path keeps all records resident. It exists for single-cell data, where
//! each record's `(sample, barcode)` must be joined against the cell-type table
//! before grouping.

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use crate::anchor::{AnchorEntry, MergedAnchor, SampleKey};
use crate::filter::{AcceptedAnchors, AnchorFilter};
use crate::lookup::CellTypeTable;
use crate::merge::output_header;
use crate::record::{Header, Record};
use crate::summary::RunStats;
use crate::utils::{kmer_to_string, open_reader};

#[derive(Debug, Default)]
pub struct Corpus {
    records: Vec<Record>,
    headers: Vec<(String, Header)>,
    missing: BTreeSet<SampleKey>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_bin(
        &mut self,
        path: &Path,
        accepted: &AcceptedAnchors,
        cell_types: Option<&CellTypeTable>,
    ) -> Result<()> {
        let reader = open_reader(path)?;
        self.read_bin(reader, &path.display().to_string(), accepted, cell_types)
    }

    /// Reads one bin, keeping accepted records whose `(sample, barcode)` is
    /// known to `cell_types` when a table is given.
    pub fn read_bin<R: Read>(
        &mut self,
        mut reader: R,
        path: &str,
        accepted: &AcceptedAnchors,
        cell_types: Option<&CellTypeTable>,
    ) -> Result<()> {
        let header = Header::load(&mut reader).with_context(|| format!("open bin {path}"))?;
        self.headers.push((path.to_string(), header));
        // fail on inconsistent symbol lengths before reading any record
        self.header()?;

        while let Some(rec) = Record::load(&mut reader, &header)
            .with_context(|| format!("read record from {path}"))?
        {
            if let Some(table) = cell_types {
                let key = (rec.sample_id, rec.barcode);
                if !table.contains(&key) {
                    self.missing.insert(key);
                    continue;
                }
            }
            if accepted.is_accepted(rec.anchor) {
                self.records.push(rec);
            }
        }
        Ok(())
    }

    /// Output header across every bin read so far.
    pub fn header(&self) -> Result<Header> {
        output_header(self.headers.iter().map(|(path, header)| (path.as_str(), header)))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(sample_id, barcode)` pairs absent from the cell-type table.
    pub fn missing(&self) -> &BTreeSet<SampleKey> {
        &self.missing
    }

    /// Warns once for every distinct pair absent from the cell-type table.
    pub fn warn_missing(&self, barcode_len_symbols: usize) {
        if self.missing.is_empty() {
            return;
        }
        warn!("following (barcode, sample_id) pairs were not found in cell type samplesheet:");
        for &(sample_id, barcode) in &self.missing {
            warn!("{}\t{}", kmer_to_string(barcode, barcode_len_symbols), sample_id);
        }
    }

    /// Sorts all records by `(anchor, target, sample_id, barcode)` and hands
    /// every anchor passing `filter` to `consume`.
    pub fn assemble<F>(
        mut self,
        filter: &AnchorFilter,
        n_most_freq_targets_for_stats: usize,
        mut consume: F,
    ) -> Result<RunStats>
    where
        F: FnMut(&MergedAnchor) -> Result<()>,
    {
        let mut stats = RunStats::default();
        if self.records.is_empty() {
            return Ok(stats);
        }

        let start = std::time::Instant::now();
        self.records.par_sort_by_key(|r| (r.anchor, r.target, r.sample_id, r.barcode));
        info!("sort records time: {:.2}s", start.elapsed().as_secs_f64());

        let mut merged = MergedAnchor::default();
        let mut process = |merged: &mut MergedAnchor, stats: &mut RunStats| -> Result<()> {
            merged.finish(n_most_freq_targets_for_stats);
            if filter.filtered_out(&merged.counts) {
                stats.anchor_filtered_out();
            } else {
                consume(merged)?;
                stats.anchor_written(merged);
            }
            Ok(())
        };

        merged.start(self.records[0].anchor);
        for rec in &self.records {
            if rec.anchor != merged.anchor {
                process(&mut merged, &mut stats)?;
                merged.start(rec.anchor);
            }
            merged.push(AnchorEntry {
                target: rec.target,
                sample_id: rec.sample_id,
                barcode: rec.barcode,
                count: rec.count,
            });
        }
        process(&mut merged, &mut stats)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bin_reader::tests::{encode_bin, rec};
    use crate::merge::merge_streaming;
    use crate::merge::tests::{bins_from, random_bins};
    use crate::record::tests::test_header;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    fn corpus_from(records: &[Vec<Record>], accepted: &AcceptedAnchors, table: Option<&CellTypeTable>) -> Corpus {
        let mut corpus = Corpus::new();
        for (i, recs) in records.iter().enumerate() {
            let bytes = encode_bin(&test_header(), recs);
            corpus.read_bin(Cursor::new(bytes), &format!("bin{i}"), accepted, table).unwrap();
        }
        corpus
    }

    fn assemble(corpus: Corpus, filter: &AnchorFilter, k: usize) -> (Vec<MergedAnchor>, RunStats) {
        let mut out = Vec::new();
        let stats = corpus
            .assemble(filter, k, |m| {
                out.push(m.clone());
                Ok(())
            })
            .unwrap();
        (out, stats)
    }

    #[test]
    fn test_groups_consecutive_anchors() {
        let records = vec![
            vec![rec(2, 5, 0, 1), rec(2, 6, 0, 2), rec(8, 1, 0, 3)],
            vec![rec(2, 5, 1, 4)],
        ];
        let corpus = corpus_from(&records, &AcceptedAnchors::accept_all(), None);
        assert_eq!(corpus.len(), 4);
        let (out, stats) = assemble(corpus, &AnchorFilter::default(), 0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].anchor, 2);
        assert_eq!(out[0].counts.tot_cnt, 7);
        assert_eq!(out[0].counts.n_unique_targets, 2);
        assert_eq!(out[0].counts.n_unique_samples, 2);
        assert_eq!(out[1].anchor, 8);
        assert_eq!(stats.tot_written_records, 4);
    }

    #[test]
    fn test_missing_cell_types_are_excluded_and_reported_once() {
        let mut table = CellTypeTable::default();
        table.insert(0, 0, "t_cell");
        let records = vec![
            vec![rec(1, 1, 0, 1), rec(2, 1, 0, 1)],
            vec![rec(1, 1, 1, 5), rec(2, 2, 1, 5), rec(3, 1, 1, 5)],
        ];
        let corpus = corpus_from(&records, &AcceptedAnchors::accept_all(), Some(&table));
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.missing().iter().copied().collect::<Vec<_>>(), vec![(1, 0)]);
    }

    #[test]
    fn test_inconsistent_bins_fail_before_records() {
        let mut other = test_header();
        other.anchor_len_symbols = 9;
        let mut corpus = Corpus::new();
        let accepted = AcceptedAnchors::accept_all();
        corpus
            .read_bin(Cursor::new(encode_bin(&test_header(), &[])), "a", &accepted, None)
            .unwrap();
        let res = corpus.read_bin(
            Cursor::new(encode_bin(&other, &[rec(1, 1, 0, 1)])),
            "b",
            &accepted,
            None,
        );
        assert!(res.is_err());
        assert!(corpus.is_empty());
    }

    #[test]
    fn test_empty_corpus_produces_nothing() {
        let corpus = corpus_from(&[vec![rec(1, 1, 0, 1)]], &AcceptedAnchors::from_anchors([2]), None);
        assert!(corpus.is_empty());
        let (out, stats) = assemble(corpus, &AnchorFilter::default(), 0);
        assert!(out.is_empty());
        assert_eq!(stats, RunStats::default());
    }

    #[test]
    fn test_matches_streaming_merge() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..40 {
            let n_bins = rng.gen_range(1..6);
            let records = random_bins(&mut rng, n_bins);
            let accepted = AcceptedAnchors::from_anchors((0..15).filter(|a| a % 3 != 0));
            let k = rng.gen_range(0..4);
            let filter = AnchorFilter { count_threshold: rng.gen_range(0..10), ..Default::default() };

            let mut streamed = Vec::new();
            let stream_stats = merge_streaming(bins_from(&records), &accepted, &filter, k, |m| {
                streamed.push(m.clone());
                Ok(())
            })
            .unwrap();
            let (assembled, corpus_stats) =
                assemble(corpus_from(&records, &accepted, None), &filter, k);

            assert_eq!(streamed.len(), assembled.len());
            for (a, b) in streamed.iter().zip(&assembled) {
                assert_eq!(a.anchor, b.anchor);
                assert_eq!(a.data, b.data);
                assert_eq!(a.counts, b.counts);
            }
            assert_eq!(stream_stats, corpus_stats);
        }
    }
}
