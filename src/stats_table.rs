//! Text layout of the statistics table and the contrast-vector side file.
//!
//! The column set depends on the run configuration. It is fixed once in
//! [`ColumnLayout`] so the header writer and the row writer cannot drift apart.

use anyhow::{Context, Result};
use std::io::Write;

use crate::anchor::MergedAnchor;
use crate::lookup::SampleNames;
use crate::stats::AnchorStatsRow;
use crate::utils::kmer_to_string;

#[derive(Debug, Clone, Default)]
pub struct ColumnLayout {
    pub anchor_len_symbols: usize,
    pub target_len_symbols: usize,
    pub compute_also_old_base_pvals: bool,
    pub without_alt_max: bool,
    pub with_effect_size_cts: bool,
    /// `n_most_freq_targets_for_stats > 0`: adds the before-truncation columns.
    pub with_truncation: bool,
    pub n_most_freq_targets: usize,
    /// Names of every cell type in the samplesheet, by cell type id.
    pub cell_types: Vec<String>,
    pub n_cjs: Option<usize>,
}

/// Floats as the downstream tables expect them: `nan`, scientific notation for
/// very small or very large magnitudes, plain otherwise.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v != 0.0 && (v.abs() < 1e-4 || v.abs() >= 1e6) {
        format!("{v:e}")
    } else {
        format!("{v}")
    }
}

/// One float column, `-` when the engine left the value out.
fn write_value<W: Write>(out: &mut W, v: Option<&f64>) -> Result<()> {
    match v {
        Some(&v) => write!(out, "{}\t", format_float(v))?,
        None => write!(out, "-\t")?,
    }
    Ok(())
}

impl ColumnLayout {
    pub fn write_header<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut cols: Vec<String> = vec!["anchor".into()];
        if self.compute_also_old_base_pvals {
            cols.push("pval_base_old".into());
            cols.push("effect_size_bin_old".into());
        }
        if !self.without_alt_max {
            cols.push("pval_rand_init_alt_max".into());
            if self.with_effect_size_cts {
                cols.push("effect_size_cts".into());
            }
        }
        for ct in &self.cell_types {
            cols.push(format!("helmert_decomp_{ct}_pval"));
            if self.with_effect_size_cts {
                cols.push(format!("helmert_decomp_{ct}_effect_size_cts"));
            }
            cols.push(format!("helmert_decomp_{ct}_effect_size_bin"));
        }
        if let Some(n_cjs) = self.n_cjs {
            for i in 0..n_cjs {
                cols.push(format!("Cjs_{i}_pval"));
                if self.with_effect_size_cts {
                    cols.push(format!("Cjs_{i}_effect_size_cts"));
                }
                cols.push(format!("Cjs_{i}_effect_size_bin"));
            }
            cols.push("num_Cj_lt_0".into());
            cols.push("num_Cj_gt_eq_0".into());
        }
        if !self.without_alt_max {
            cols.push("effect_size_bin".into());
            cols.push("pval_asymp_base".into());
        }
        cols.push("pval_base".into());
        cols.push("M".into());
        cols.push("anch_uniqTargs".into());
        if self.with_truncation {
            cols.push("M_before_filter".into());
            cols.push("anch_uniqTargs_before_filter".into());
        }
        for name in [
            "number_nonzero_samples",
            "target_entropy",
            "avg_no_homopolymer_targets",
            "avg_hamming_distance_max_target",
            "avg_hamming_distance_all_pairs",
            "avg_edit_distance_max_target",
            "avg_edit_distance_all_pairs",
        ] {
            cols.push(name.into());
        }
        for i in 1..=self.n_most_freq_targets {
            cols.push(format!("most_freq_target_{i}"));
            cols.push(format!("cnt_most_freq_target_{i}"));
        }

        for col in &cols {
            write!(out, "{col}\t")?;
        }
        writeln!(out).context("write stats header")?;
        Ok(())
    }

    pub fn write_row<W: Write>(
        &self,
        out: &mut W,
        anchor: &MergedAnchor,
        row: &AnchorStatsRow,
    ) -> Result<()> {
        let f = format_float;
        write!(out, "{}\t", kmer_to_string(anchor.anchor, self.anchor_len_symbols))?;
        if self.compute_also_old_base_pvals {
            write!(out, "{}\t{}\t", f(row.pval_base_old), f(row.effect_size_bin_old))?;
        }
        if !self.without_alt_max {
            write!(out, "{}\t", f(row.pval_rand_init_alt_max))?;
            if self.with_effect_size_cts {
                write!(out, "{}\t", f(row.effect_size_cts))?;
            }
        }
        self.write_helmert(out, row)?;
        if let Some(n_cjs) = self.n_cjs {
            for i in 0..n_cjs {
                write_value(out, row.cjs_pvals.get(i))?;
                if self.with_effect_size_cts {
                    write_value(out, row.cjs_effect_size_cts.get(i))?;
                }
                write_value(out, row.cjs_effect_size_bin.get(i))?;
            }
            write!(out, "{}\t{}\t", row.cjs_num_lt_0, row.cjs_num_rest)?;
        }
        if !self.without_alt_max {
            write!(out, "{}\t{}\t", f(row.effect_size_bin), f(row.pval_asymp_base))?;
        }
        let c = &anchor.counts;
        write!(out, "{}\t{}\t{}\t", f(row.pval_base), c.tot_cnt, c.n_unique_targets)?;
        if self.with_truncation {
            write!(out, "{}\t{}\t", c.tot_cnt_before_filter, c.n_unique_targets_before_filter)?;
        }
        write!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t",
            c.n_unique_samples,
            f(row.entropy),
            f(row.avg_no_homopolymer_targets),
            f(row.avg_hamming_distance_max_target),
            f(row.avg_hamming_distance_all_pairs),
            f(row.avg_edit_distance_max_target),
            f(row.avg_edit_distance_all_pairs),
        )?;
        for i in 0..self.n_most_freq_targets {
            match row.most_freq_targets.get(i) {
                Some(&(target, cnt)) => {
                    write!(out, "{}\t{}\t", kmer_to_string(target, self.target_len_symbols), cnt)?
                }
                None => write!(out, "-\t0\t")?,
            }
        }
        writeln!(out).context("write stats row")?;
        Ok(())
    }

    /// One column group per cell type of the samplesheet: `-` when absent from
    /// the anchor, `x` for the first present one (no Helmert contrast).
    fn write_helmert<W: Write>(&self, out: &mut W, row: &AnchorStatsRow) -> Result<()> {
        let n_cols = if self.with_effect_size_cts { 3 } else { 2 };
        for ct_id in 0..self.cell_types.len() as u32 {
            match row.cell_type_ids.binary_search(&ct_id) {
                Err(_) => {
                    for _ in 0..n_cols {
                        write!(out, "-\t")?;
                    }
                }
                Ok(0) => {
                    for _ in 0..n_cols {
                        write!(out, "x\t")?;
                    }
                }
                Ok(pos) => {
                    let i = pos - 1;
                    write_value(out, row.helmert_decomposition_pvals.get(i))?;
                    if self.with_effect_size_cts {
                        write_value(out, row.helmert_decomposition_effect_size_cts.get(i))?;
                    }
                    write_value(out, row.helmert_decomposition_effect_size_bin.get(i))?;
                }
            }
        }
        Ok(())
    }
}

/// Side file of the contrast vectors behind significant anchors.
pub struct CjWriter<W: Write> {
    out: W,
    max_pval: f64,
    anchor_len_symbols: usize,
}

impl<W: Write> CjWriter<W> {
    pub fn new(out: W, max_pval: f64, anchor_len_symbols: usize) -> Self {
        Self { out, max_pval, anchor_len_symbols }
    }

    pub fn write(&mut self, anchor: u64, row: &AnchorStatsRow, names: &SampleNames) -> Result<()> {
        // NaN p-values never pass
        let significant = row.pval_rand_init_alt_max <= self.max_pval;
        if row.cj_vector.is_empty() || !significant {
            return Ok(());
        }
        write!(self.out, "{}", kmer_to_string(anchor, self.anchor_len_symbols))?;
        for &(sample_id, cj) in &row.cj_vector {
            write!(self.out, "\t{}={}", names.display(sample_id), format_float(cj))?;
        }
        writeln!(self.out).context("write cjs line")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().context("flush cjs output")
    }
}
