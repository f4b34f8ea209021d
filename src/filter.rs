use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;

use crate::anchor::AnchorCounts;
use crate::utils::{open_reader, string_to_kmer};

/// Allow-list of anchors, or accept-all when no list was given.
#[derive(Debug, Clone, Default)]
pub struct AcceptedAnchors {
    anchors: Option<HashSet<u64>>,
}

impl AcceptedAnchors {
    pub fn accept_all() -> Self {
        Self { anchors: None }
    }

    pub fn from_anchors<I: IntoIterator<Item = u64>>(anchors: I) -> Self {
        Self { anchors: Some(anchors.into_iter().collect()) }
    }

    /// Loads whitespace separated anchor sequences from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = open_reader(path)?;
        let mut anchors = HashSet::new();
        for (idx, line) in reader.lines().enumerate() {
            let line =
                line.with_context(|| format!("read line {} from {}", idx + 1, path.display()))?;
            for word in line.split_whitespace() {
                let anchor = string_to_kmer(word)
                    .with_context(|| format!("parse anchor list {}", path.display()))?;
                anchors.insert(anchor);
            }
        }
        Ok(Self { anchors: Some(anchors) })
    }

    pub fn is_accepted(&self, anchor: u64) -> bool {
        self.anchors.as_ref().map_or(true, |set| set.contains(&anchor))
    }

    pub fn len(&self) -> Option<usize> {
        self.anchors.as_ref().map(HashSet::len)
    }
}

/// Minimum-volume thresholds; an anchor at or below any of them is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnchorFilter {
    pub count_threshold: u64,
    pub unique_targets_threshold: u64,
    pub samples_threshold: u64,
}

impl AnchorFilter {
    /// True when the anchor must be dropped, judged on the kept counts.
    pub fn filtered_out(&self, counts: &AnchorCounts) -> bool {
        counts.tot_cnt <= self.count_threshold
            || counts.n_unique_targets <= self.unique_targets_threshold
            || counts.n_unique_samples <= self.samples_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn counts(tot_cnt: u64, n_unique_targets: u64, n_unique_samples: u64) -> AnchorCounts {
        AnchorCounts { tot_cnt, n_unique_targets, n_unique_samples, ..Default::default() }
    }

    #[test]
    fn test_default_filter_is_permissive() {
        let filter = AnchorFilter::default();
        assert!(!filter.filtered_out(&counts(1, 1, 1)));
    }

    #[test]
    fn test_count_threshold_is_inclusive() {
        let filter = AnchorFilter { count_threshold: 10, ..Default::default() };
        assert!(filter.filtered_out(&counts(10, 3, 3)));
        assert!(!filter.filtered_out(&counts(11, 3, 3)));
    }

    #[test]
    fn test_each_threshold_rejects() {
        let targets = AnchorFilter { unique_targets_threshold: 2, ..Default::default() };
        assert!(targets.filtered_out(&counts(100, 2, 5)));
        let samples = AnchorFilter { samples_threshold: 4, ..Default::default() };
        assert!(samples.filtered_out(&counts(100, 5, 4)));
        assert!(!samples.filtered_out(&counts(100, 5, 5)));
    }

    #[test]
    fn test_load_anchor_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ACGT AAAA\n\nTTTT").unwrap();
        let accepted = AcceptedAnchors::load(file.path()).unwrap();
        assert_eq!(accepted.len(), Some(3));
        assert!(accepted.is_accepted(string_to_kmer("ACGT").unwrap()));
        assert!(accepted.is_accepted(0));
        assert!(!accepted.is_accepted(string_to_kmer("CCCC").unwrap()));
    }

    #[test]
    fn test_accept_all() {
        let accepted = AcceptedAnchors::accept_all();
        assert!(accepted.is_accepted(12345));
        assert_eq!(accepted.len(), None);
    }
}
