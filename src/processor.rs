//! Output dispatch: one strategy per run mode, one anchor at a time.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::anchor::MergedAnchor;
use crate::config::{DumpFormat, Params, RunMode};
use crate::constants::{IO_BUFFER_SIZE, MAX_TARGETS_FOR_10X_STATS};
use crate::lookup::{LookupTables, SampleNames};
use crate::record::{Header, Record};
use crate::stats::{AnchorStatsRow, DescriptiveStats, StatsEngine};
use crate::stats_table::{CjWriter, ColumnLayout};
use crate::utils::kmer_to_string;

pub struct StatsOutput<W: Write> {
    out: W,
    layout: ColumnLayout,
    engine: Box<dyn StatsEngine>,
    row: AnchorStatsRow,
    sample_names: SampleNames,
    cjs: Option<CjWriter<W>>,
    /// Anchors with at least this many unique targets skip the engine.
    max_targets_for_stats: Option<u64>,
}

impl<W: Write> StatsOutput<W> {
    pub fn new(
        mut out: W,
        layout: ColumnLayout,
        engine: Box<dyn StatsEngine>,
        sample_names: SampleNames,
    ) -> Result<Self> {
        layout.write_header(&mut out)?;
        Ok(Self {
            out,
            layout,
            engine,
            row: AnchorStatsRow::default(),
            sample_names,
            cjs: None,
            max_targets_for_stats: None,
        })
    }

    pub fn with_cjs_out(mut self, cjs: CjWriter<W>) -> Self {
        self.cjs = Some(cjs);
        self
    }

    pub fn with_max_targets_for_stats(mut self, max_targets: u64) -> Self {
        self.max_targets_for_stats = Some(max_targets);
        self
    }

    fn consume(&mut self, anchor: &MergedAnchor) -> Result<()> {
        self.row.reset();
        self.engine.extra_stats(anchor, &mut self.row)?;
        let too_large = self
            .max_targets_for_stats
            .is_some_and(|max| anchor.counts.n_unique_targets >= max);
        if !too_large {
            self.engine.compute_stats(anchor, &mut self.row)?;
        }
        self.layout.write_row(&mut self.out, anchor, &self.row)?;
        if let Some(cjs) = self.cjs.as_mut() {
            cjs.write(anchor.anchor, &self.row, &self.sample_names)?;
        }
        Ok(())
    }
}

pub enum AnchorProcessor<W: Write = BufWriter<File>> {
    /// Re-encodes every entry with the output header.
    Binary { out: W, header: Header },
    /// One text line per entry.
    Dump { out: W, format: DumpFormat, header: Header, sample_names: SampleNames },
    /// One statistics row per anchor.
    Stats(Box<StatsOutput<W>>),
}

fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("cannot create output file {}", path.display()))?;
    Ok(BufWriter::with_capacity(IO_BUFFER_SIZE, file))
}

impl AnchorProcessor {
    /// Opens the output for the configured run mode; `header` is the merged
    /// output header.
    pub fn create(params: &Params, header: &Header, tables: LookupTables) -> Result<Self> {
        let out = create_writer(&params.outpath)?;
        match params.run_mode {
            RunMode::JustMerge => AnchorProcessor::binary(out, *header),
            RunMode::JustMergeAndDump => {
                Ok(AnchorProcessor::dump(out, params.format, *header, tables.sample_names))
            }
            RunMode::CalcStats => {
                let layout = ColumnLayout {
                    anchor_len_symbols: header.anchor_len_symbols as usize,
                    target_len_symbols: header.target_len_symbols as usize,
                    compute_also_old_base_pvals: params.compute_also_old_base_pvals,
                    without_alt_max: params.without_alt_max,
                    with_effect_size_cts: params.with_effect_size_cts,
                    with_truncation: params.n_most_freq_targets_for_stats > 0,
                    n_most_freq_targets: params.n_most_freq_targets,
                    cell_types: tables.cell_types.as_ref().map_or_else(Vec::new, |table| {
                        (0..table.n_cell_types() as u32)
                            .filter_map(|id| table.cell_type_name(id).map(str::to_string))
                            .collect()
                    }),
                    n_cjs: tables.contrasts.as_ref().map(|sheet| sheet.n_cjs()),
                };
                let engine = DescriptiveStats::new(
                    params.engine_params(),
                    header.target_len_symbols as usize,
                    tables.cell_types,
                    tables.contrasts,
                );
                let mut stats = StatsOutput::new(out, layout, Box::new(engine), tables.sample_names)?;
                if let Some(path) = &params.cjs_out {
                    let cjs = CjWriter::new(
                        create_writer(path)?,
                        params.max_pval_rand_init_alt_max_for_cjs,
                        header.anchor_len_symbols as usize,
                    );
                    stats = stats.with_cjs_out(cjs);
                }
                if params.is_10x {
                    stats = stats.with_max_targets_for_stats(MAX_TARGETS_FOR_10X_STATS as u64);
                }
                Ok(AnchorProcessor::Stats(Box::new(stats)))
            }
        }
    }
}

impl<W: Write> AnchorProcessor<W> {
    pub fn binary(mut out: W, header: Header) -> Result<Self> {
        header.serialize(&mut out).context("write output header")?;
        Ok(AnchorProcessor::Binary { out, header })
    }

    pub fn dump(out: W, format: DumpFormat, header: Header, sample_names: SampleNames) -> Self {
        AnchorProcessor::Dump { out, format, header, sample_names }
    }

    pub fn consume_anchor(&mut self, anchor: &MergedAnchor) -> Result<()> {
        match self {
            AnchorProcessor::Binary { out, header } => {
                for e in &anchor.data {
                    let rec = Record {
                        anchor: anchor.anchor,
                        target: e.target,
                        sample_id: e.sample_id,
                        barcode: e.barcode,
                        count: e.count,
                    };
                    rec.serialize(out, header)?;
                }
                Ok(())
            }
            AnchorProcessor::Dump { out, format, header, sample_names } => {
                let anchor_str = kmer_to_string(anchor.anchor, header.anchor_len_symbols as usize);
                let target_len = header.target_len_symbols as usize;
                for e in &anchor.data {
                    let sample = sample_names.display(e.sample_id);
                    let target = kmer_to_string(e.target, target_len);
                    match format {
                        DumpFormat::Satc if header.barcode_len_symbols > 0 => {
                            let barcode =
                                kmer_to_string(e.barcode, header.barcode_len_symbols as usize);
                            writeln!(out, "{sample}\t{barcode}\t{anchor_str}\t{target}\t{}", e.count)?
                        }
                        DumpFormat::Satc => {
                            writeln!(out, "{sample}\t{anchor_str}\t{target}\t{}", e.count)?
                        }
                        DumpFormat::Nomad => {
                            writeln!(out, "{}\t{anchor_str}\t{target}\t{sample}", e.count)?
                        }
                    }
                }
                Ok(())
            }
            AnchorProcessor::Stats(stats) => stats.consume(anchor),
        }
    }

    /// Flushes every output and returns the main writer.
    pub fn finish(self) -> Result<W> {
        let mut out = match self {
            AnchorProcessor::Binary { out, .. } | AnchorProcessor::Dump { out, .. } => out,
            AnchorProcessor::Stats(stats) => {
                let StatsOutput { out, cjs, .. } = *stats;
                if let Some(mut cjs) = cjs {
                    cjs.flush()?;
                }
                out
            }
        };
        out.flush().context("flush output")?;
        Ok(out)
    }
}
