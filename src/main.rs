#![allow(dead_code)]

mod anchor;
mod bin_reader;
mod config;
mod constants;
mod corpus;
mod errors;
mod filter;
mod lookup;
mod merge;
mod processor;
mod record;
mod run;
mod stats;
mod stats_table;
mod summary;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use crate::config::{DumpFormat, Params, RunMode};
use crate::filter::AnchorFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Merge sorted SATC bins into one anchor-ordered stream", long_about = None)]
struct Args {
    /// Output file
    outpath: PathBuf,
    /// File listing the input bins, one path per line
    input_list: PathBuf,
    /// Input comes from 10X single-cell data
    #[arg(long = "is-10x")]
    is_10x: bool,
    /// Anchors with a total count at or below this value are dropped
    #[arg(long, default_value_t = 0)]
    anchor_count_threshold: u64,
    /// Anchors with this many unique targets or fewer are dropped
    #[arg(long, default_value_t = 0)]
    anchor_unique_targets_threshold: u64,
    /// Anchors present in this many samples or fewer are dropped
    #[arg(long, default_value_t = 0)]
    anchor_samples_threshold: u64,
    /// Number of most frequent targets written in the stats table
    #[arg(long, default_value_t = 0)]
    n_most_freq_targets: usize,
    /// Keep only this many most frequent targets per anchor (0 keeps all)
    #[arg(long, default_value_t = 0)]
    n_most_freq_targets_for_stats: usize,
    #[arg(long, default_value_t = 0.25)]
    train_fraction: f64,
    #[arg(long, default_value_t = 10)]
    generate_alt_max_cf_no_tries: usize,
    #[arg(long, default_value_t = 50)]
    alt_maximize_iters: usize,
    #[arg(long, default_value_t = 50)]
    num_rand_cf: usize,
    #[arg(long)]
    without_alt_max: bool,
    #[arg(long)]
    with_effect_size_cts: bool,
    #[arg(long)]
    compute_also_old_base_pvals: bool,
    /// Only anchors listed in this file are merged
    #[arg(long)]
    anchor_list: Option<PathBuf>,
    /// Side file for the contrast vectors of significant anchors
    #[arg(long)]
    cjs_out: Option<PathBuf>,
    #[arg(long, default_value_t = 0.1)]
    max_pval_rand_init_alt_max_for_cjs: f64,
    /// Lines of `<sample_name> <sample_id>`
    #[arg(long)]
    sample_names: Option<PathBuf>,
    /// Rows of `sample_name,barcode,cell_type`
    #[arg(long)]
    cell_type_samplesheet: Option<PathBuf>,
    /// Rows of `sample_name,c_1,...,c_n`
    #[arg(long)]
    cjs_samplesheet: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = RunMode::CalcStats)]
    run_mode: RunMode,
    /// Text layout of just-merge-and-dump
    #[arg(long, value_enum, default_value_t = DumpFormat::Satc)]
    format: DumpFormat,
    /// Number of threads (defaults to all available threads)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,
}

impl Args {
    fn into_params(self) -> Result<Params> {
        let bins = utils::read_fof(&self.input_list)?;
        Ok(Params {
            is_10x: self.is_10x,
            filter: AnchorFilter {
                count_threshold: self.anchor_count_threshold,
                unique_targets_threshold: self.anchor_unique_targets_threshold,
                samples_threshold: self.anchor_samples_threshold,
            },
            n_most_freq_targets: self.n_most_freq_targets,
            n_most_freq_targets_for_stats: self.n_most_freq_targets_for_stats,
            train_fraction: self.train_fraction,
            generate_alt_max_cf_no_tries: self.generate_alt_max_cf_no_tries,
            alt_maximize_iters: self.alt_maximize_iters,
            num_rand_cf: self.num_rand_cf,
            without_alt_max: self.without_alt_max,
            with_effect_size_cts: self.with_effect_size_cts,
            compute_also_old_base_pvals: self.compute_also_old_base_pvals,
            anchor_list: self.anchor_list,
            cjs_out: self.cjs_out,
            max_pval_rand_init_alt_max_for_cjs: self.max_pval_rand_init_alt_max_for_cjs,
            sample_names: self.sample_names,
            cell_type_samplesheet: self.cell_type_samplesheet,
            cjs_samplesheet: self.cjs_samplesheet,
            run_mode: self.run_mode,
            format: self.format,
            outpath: self.outpath,
            bins,
        })
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("configure thread pool")?;
    }
    let params = args.into_params()?;
    params.log();

    let start = std::time::Instant::now();
    let stats = run::run(&params)?;
    stats.log();
    info!("total time: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = try_main() {
        error!("{err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_kebab_options() {
        let args = Args::try_parse_from([
            "satc_merge",
            "--is-10x",
            "--run-mode",
            "just-merge-and-dump",
            "--format",
            "nomad",
            "--anchor-count-threshold",
            "5",
            "out.txt",
            "bins.txt",
        ])
        .unwrap();
        assert!(args.is_10x);
        assert_eq!(args.run_mode, RunMode::JustMergeAndDump);
        assert_eq!(args.format, DumpFormat::Nomad);
        assert_eq!(args.anchor_count_threshold, 5);
        assert_eq!(args.outpath, PathBuf::from("out.txt"));
    }

    #[test]
    fn test_into_params_reads_bin_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let fof = dir.path().join("bins.txt");
        std::fs::write(&fof, "a.bin\n\nb.bin\n").unwrap();
        let fof = fof.to_str().unwrap();
        let args = Args::try_parse_from(["satc_merge", "out.tsv", fof]).unwrap();
        let params = args.into_params().unwrap();
        assert_eq!(params.bins, vec![PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
        assert_eq!(params.run_mode, RunMode::CalcStats);
        assert_eq!(params.n_most_freq_targets, 0);
    }
}
