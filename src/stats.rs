use anyhow::Result;
use std::collections::BTreeSet;

use crate::anchor::MergedAnchor;
use crate::constants::{HOMOPOLYMER_LEN, MAX_TARGETS_FOR_DISTANCES};
use crate::lookup::{CellTypeTable, ContrastSheet};

/*
PER-ANCHOR STATISTICS.

The statistical tests (p-values, effect sizes, Helmert and contrast
decompositions) belong to an external engine plugged in through
`StatsEngine`. `DescriptiveStats` fills the descriptive columns and the
per-anchor cell type / contrast bookkeeping, and reports every test as NaN.
*/

#[derive(Debug, Clone, Default)]
pub struct AnchorStatsRow {
    pub pval_base_old: f64,
    pub effect_size_bin_old: f64,
    pub pval_rand_init_alt_max: f64,
    pub effect_size_cts: f64,
    pub effect_size_bin: f64,
    pub pval_asymp_base: f64,
    pub pval_base: f64,

    pub entropy: f64,
    pub avg_no_homopolymer_targets: f64,
    pub avg_hamming_distance_max_target: f64,
    pub avg_hamming_distance_all_pairs: f64,
    pub avg_edit_distance_max_target: f64,
    pub avg_edit_distance_all_pairs: f64,
    /// `(target, count)`, most frequent first.
    pub most_freq_targets: Vec<(u64, u64)>,

    /// Sorted ids of the cell types present in the anchor.
    pub cell_type_ids: Vec<u32>,
    /// One value per cell type after the first in `cell_type_ids`.
    pub helmert_decomposition_pvals: Vec<f64>,
    pub helmert_decomposition_effect_size_cts: Vec<f64>,
    pub helmert_decomposition_effect_size_bin: Vec<f64>,

    pub cjs_pvals: Vec<f64>,
    pub cjs_effect_size_cts: Vec<f64>,
    pub cjs_effect_size_bin: Vec<f64>,
    pub cjs_num_lt_0: u64,
    pub cjs_num_rest: u64,

    /// `(sample_id, cj)` found for the anchor, written to the side output.
    pub cj_vector: Vec<(u64, f64)>,
}

impl AnchorStatsRow {
    pub fn reset(&mut self) {
        self.pval_base_old = f64::NAN;
        self.effect_size_bin_old = f64::NAN;
        self.pval_rand_init_alt_max = f64::NAN;
        self.effect_size_cts = f64::NAN;
        self.effect_size_bin = f64::NAN;
        self.pval_asymp_base = f64::NAN;
        self.pval_base = f64::NAN;
        self.entropy = 0.0;
        self.avg_no_homopolymer_targets = 0.0;
        self.avg_hamming_distance_max_target = 0.0;
        self.avg_hamming_distance_all_pairs = 0.0;
        self.avg_edit_distance_max_target = 0.0;
        self.avg_edit_distance_all_pairs = 0.0;
        self.most_freq_targets.clear();
        self.cell_type_ids.clear();
        self.helmert_decomposition_pvals.clear();
        self.helmert_decomposition_effect_size_cts.clear();
        self.helmert_decomposition_effect_size_bin.clear();
        self.cjs_pvals.clear();
        self.cjs_effect_size_cts.clear();
        self.cjs_effect_size_bin.clear();
        self.cjs_num_lt_0 = 0;
        self.cjs_num_rest = 0;
        self.cj_vector.clear();
    }
}

pub trait StatsEngine {
    /// Descriptive statistics, computed for every written anchor.
    fn extra_stats(&mut self, anchor: &MergedAnchor, row: &mut AnchorStatsRow) -> Result<()>;

    /// Statistical tests; may be skipped for oversized single-cell anchors.
    fn compute_stats(&mut self, anchor: &MergedAnchor, row: &mut AnchorStatsRow) -> Result<()>;
}

/// Settings handed to every engine at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    pub n_most_freq_targets: usize,
    pub train_fraction: f64,
    pub generate_alt_max_cf_no_tries: usize,
    pub alt_maximize_iters: usize,
    pub num_rand_cf: usize,
    pub without_alt_max: bool,
    pub with_effect_size_cts: bool,
    pub compute_also_old_base_pvals: bool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            n_most_freq_targets: 0,
            train_fraction: 0.25,
            generate_alt_max_cf_no_tries: 10,
            alt_maximize_iters: 50,
            num_rand_cf: 50,
            without_alt_max: false,
            with_effect_size_cts: false,
            compute_also_old_base_pvals: false,
        }
    }
}

pub struct DescriptiveStats {
    params: EngineParams,
    target_len_symbols: usize,
    cell_types: Option<CellTypeTable>,
    contrasts: Option<ContrastSheet>,
    target_totals: Vec<(u64, u64)>,
}

impl DescriptiveStats {
    pub fn new(
        params: EngineParams,
        target_len_symbols: usize,
        cell_types: Option<CellTypeTable>,
        contrasts: Option<ContrastSheet>,
    ) -> Self {
        Self { params, target_len_symbols, cell_types, contrasts, target_totals: Vec::new() }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }
}

impl StatsEngine for DescriptiveStats {
    fn extra_stats(&mut self, anchor: &MergedAnchor, row: &mut AnchorStatsRow) -> Result<()> {
        target_totals(anchor, &mut self.target_totals);
        let totals = &mut self.target_totals;
        row.entropy = entropy(totals);

        let len = self.target_len_symbols;
        let n_homopolymer =
            totals.iter().filter(|&&(t, _)| has_homopolymer(t, len, HOMOPOLYMER_LEN)).count();
        row.avg_no_homopolymer_targets =
            if totals.is_empty() { 0.0 } else { n_homopolymer as f64 / totals.len() as f64 };

        // most frequent first, ties by smaller target
        totals.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        row.most_freq_targets.extend(totals.iter().take(self.params.n_most_freq_targets).copied());

        let top = &totals[..totals.len().min(MAX_TARGETS_FOR_DISTANCES)];
        let (ham_max, ham_all) = avg_distances(top, |a, b| hamming_distance(a, b) as f64);
        let (edit_max, edit_all) = avg_distances(top, |a, b| edit_distance(a, b, len) as f64);
        row.avg_hamming_distance_max_target = ham_max;
        row.avg_hamming_distance_all_pairs = ham_all;
        row.avg_edit_distance_max_target = edit_max;
        row.avg_edit_distance_all_pairs = edit_all;
        Ok(())
    }

    fn compute_stats(&mut self, anchor: &MergedAnchor, row: &mut AnchorStatsRow) -> Result<()> {
        if let Some(table) = &self.cell_types {
            let ids: BTreeSet<u32> =
                anchor.samples.iter().filter_map(|key| table.cell_type_id(key)).collect();
            row.cell_type_ids.extend(ids);
            let n = row.cell_type_ids.len().saturating_sub(1);
            row.helmert_decomposition_pvals.resize(n, f64::NAN);
            row.helmert_decomposition_effect_size_cts.resize(n, f64::NAN);
            row.helmert_decomposition_effect_size_bin.resize(n, f64::NAN);
        }
        if let Some(sheet) = &self.contrasts {
            let n = sheet.n_cjs();
            row.cjs_pvals.resize(n, f64::NAN);
            row.cjs_effect_size_cts.resize(n, f64::NAN);
            row.cjs_effect_size_bin.resize(n, f64::NAN);
            for &(sample_id, _) in &anchor.samples {
                for &cj in sheet.contrasts(sample_id).unwrap_or_default() {
                    if cj < 0.0 {
                        row.cjs_num_lt_0 += 1;
                    } else {
                        row.cjs_num_rest += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Per-target totals of an anchor whose entries are sorted by target.
fn target_totals(anchor: &MergedAnchor, out: &mut Vec<(u64, u64)>) {
    out.clear();
    for entry in &anchor.data {
        match out.last_mut() {
            Some((target, total)) if *target == entry.target => {
                *total = total.saturating_add(entry.count)
            }
            _ => out.push((entry.target, entry.count)),
        }
    }
}

/// Shannon entropy, base 2, of the target distribution.
pub fn entropy(totals: &[(u64, u64)]) -> f64 {
    let sum: f64 = totals.iter().map(|&(_, c)| c as f64).sum();
    if sum == 0.0 {
        return 0.0;
    }
    totals
        .iter()
        .filter(|&&(_, c)| c > 0)
        .map(|&(_, c)| {
            let p = c as f64 / sum;
            -p * p.log2()
        })
        .sum()
}

pub fn has_homopolymer(kmer: u64, len: usize, run: usize) -> bool {
    if run == 0 || len < run {
        return false;
    }
    let mut cur = 1;
    for i in 1..len {
        if (kmer >> (2 * i)) & 0b11 == (kmer >> (2 * (i - 1))) & 0b11 {
            cur += 1;
            if cur >= run {
                return true;
            }
        } else {
            cur = 1;
        }
    }
    false
}

/// Number of differing symbols between two packed k-mers.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    let x = a ^ b;
    ((x | (x >> 1)) & 0x5555_5555_5555_5555).count_ones()
}

/// Levenshtein distance between two packed k-mers of `len` symbols.
pub fn edit_distance(a: u64, b: u64, len: usize) -> usize {
    let sym = |k: u64, i: usize| (k >> (2 * (len - 1 - i))) & 0b11;
    let mut prev: Vec<usize> = (0..=len).collect();
    let mut cur = vec![0; len + 1];
    for i in 1..=len {
        cur[0] = i;
        for j in 1..=len {
            let cost = usize::from(sym(a, i - 1) != sym(b, j - 1));
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[len]
}

/// Average distance to the first (most frequent) target, and over all pairs.
fn avg_distances<F: Fn(u64, u64) -> f64>(targets: &[(u64, u64)], dist: F) -> (f64, f64) {
    if targets.len() < 2 {
        return (0.0, 0.0);
    }
    let max_target = targets[0].0;
    let to_max: f64 = targets[1..].iter().map(|&(t, _)| dist(max_target, t)).sum();
    let mut all = 0.0;
    let mut pairs = 0usize;
    for (i, &(a, _)) in targets.iter().enumerate() {
        for &(b, _) in &targets[i + 1..] {
            all += dist(a, b);
            pairs += 1;
        }
    }
    (to_max / (targets.len() - 1) as f64, all / pairs as f64)
}
