use anyhow::{Context, Result};
use log::{info, warn};
use std::time::Instant;

use crate::bin_reader::BinReader;
use crate::config::Params;
use crate::corpus::Corpus;
use crate::filter::AcceptedAnchors;
use crate::lookup::LookupTables;
use crate::merge::{merge_streaming, output_header};
use crate::processor::AnchorProcessor;
use crate::summary::RunStats;

/// Runs the whole pipeline for validated `params`.
pub fn run(params: &Params) -> Result<RunStats> {
    params.validate()?;
    let accepted = match &params.anchor_list {
        Some(path) => {
            let accepted = AcceptedAnchors::load(path)?;
            info!("accepted anchors: {}", accepted.len().unwrap_or_default());
            accepted
        }
        None => AcceptedAnchors::accept_all(),
    };
    let tables = LookupTables::load(
        params.sample_names.as_deref(),
        params.cell_type_samplesheet.as_deref(),
        params.cjs_samplesheet.as_deref(),
    )?;

    let stats = if params.whole_corpus() {
        run_whole_corpus(params, &accepted, tables)?
    } else {
        run_streaming(params, &accepted, tables)?
    };
    if stats.tot_written_anchors == 0 {
        warn!("no anchors written to {}", params.outpath.display());
    }
    Ok(stats)
}

fn run_streaming(params: &Params, accepted: &AcceptedAnchors, tables: LookupTables) -> Result<RunStats> {
    let bins = params
        .bins
        .iter()
        .map(|path| BinReader::open(path))
        .collect::<Result<Vec<_>>>()?;
    let header = output_header(bins.iter().map(|bin| (bin.path(), bin.header())))?;

    let mut processor = AnchorProcessor::create(params, &header, tables)?;
    let stats = merge_streaming(
        bins,
        accepted,
        &params.filter,
        params.n_most_freq_targets_for_stats,
        |anchor| processor.consume_anchor(anchor),
    )?;
    processor.finish()?;
    Ok(stats)
}

fn run_whole_corpus(
    params: &Params,
    accepted: &AcceptedAnchors,
    tables: LookupTables,
) -> Result<RunStats> {
    let start = Instant::now();
    let mut corpus = Corpus::new();
    for path in &params.bins {
        corpus
            .load_bin(path, accepted, tables.cell_types.as_ref())
            .with_context(|| format!("load {}", path.display()))?;
    }
    info!("read records time: {:.2}s", start.elapsed().as_secs_f64());
    info!("records in memory: {}", corpus.len());

    let header = corpus.header()?;
    corpus.warn_missing(header.barcode_len_symbols as usize);

    let start = Instant::now();
    let mut processor = AnchorProcessor::create(params, &header, tables)?;
    let stats = corpus.assemble(&params.filter, params.n_most_freq_targets_for_stats, |anchor| {
        processor.consume_anchor(anchor)
    })?;
    processor.finish()?;
    info!("process anchors time: {:.2}s", start.elapsed().as_secs_f64());
    Ok(stats)
}
