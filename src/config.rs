use clap::ValueEnum;
use log::info;
use num_format::{Locale, ToFormattedString};
use std::path::PathBuf;

use crate::errors::MergeError;
use crate::filter::AnchorFilter;
use crate::stats::EngineParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Merge and write one statistics row per anchor
    CalcStats,
    /// Merge into a single bin
    JustMerge,
    /// Merge and print every record as text
    JustMergeAndDump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpFormat {
    Satc,
    Nomad,
}

/// Validated run configuration, immutable once built.
#[derive(Debug, Clone)]
pub struct Params {
    pub is_10x: bool,
    pub filter: AnchorFilter,
    pub n_most_freq_targets: usize,
    pub n_most_freq_targets_for_stats: usize,
    pub train_fraction: f64,
    pub generate_alt_max_cf_no_tries: usize,
    pub alt_maximize_iters: usize,
    pub num_rand_cf: usize,
    pub without_alt_max: bool,
    pub with_effect_size_cts: bool,
    pub compute_also_old_base_pvals: bool,
    pub anchor_list: Option<PathBuf>,
    pub cjs_out: Option<PathBuf>,
    pub max_pval_rand_init_alt_max_for_cjs: f64,
    pub sample_names: Option<PathBuf>,
    pub cell_type_samplesheet: Option<PathBuf>,
    pub cjs_samplesheet: Option<PathBuf>,
    pub run_mode: RunMode,
    pub format: DumpFormat,
    pub outpath: PathBuf,
    pub bins: Vec<PathBuf>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            is_10x: false,
            filter: AnchorFilter::default(),
            n_most_freq_targets: 0,
            n_most_freq_targets_for_stats: 0,
            train_fraction: 0.25,
            generate_alt_max_cf_no_tries: 10,
            alt_maximize_iters: 50,
            num_rand_cf: 50,
            without_alt_max: false,
            with_effect_size_cts: false,
            compute_also_old_base_pvals: false,
            anchor_list: None,
            cjs_out: None,
            max_pval_rand_init_alt_max_for_cjs: 0.1,
            sample_names: None,
            cell_type_samplesheet: None,
            cjs_samplesheet: None,
            run_mode: RunMode::CalcStats,
            format: DumpFormat::Satc,
            outpath: PathBuf::new(),
            bins: Vec::new(),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), MergeError> {
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(MergeError::InvalidParameter {
                parameter: "train_fraction",
                reason: format!("must be in (0, 1), got {}", self.train_fraction),
            });
        }
        if self.bins.is_empty() {
            return Err(MergeError::InvalidParameter {
                parameter: "input_list",
                reason: "at least one input bin must be specified".to_string(),
            });
        }
        if self.sample_names.is_none() {
            if self.cell_type_samplesheet.is_some() {
                return Err(MergeError::MissingCoConfiguration {
                    option: "--cell-type-samplesheet",
                    required: "--sample-names",
                });
            }
            if self.cjs_samplesheet.is_some() {
                return Err(MergeError::MissingCoConfiguration {
                    option: "--cjs-samplesheet",
                    required: "--sample-names",
                });
            }
        }
        if self.cell_type_samplesheet.is_some() && !self.is_10x {
            return Err(MergeError::MissingCoConfiguration {
                option: "--cell-type-samplesheet",
                required: "--is-10x",
            });
        }
        if self.cjs_samplesheet.is_some() && self.is_10x {
            return Err(MergeError::InvalidParameter {
                parameter: "cjs_samplesheet",
                reason: "not supported for 10X data".to_string(),
            });
        }
        Ok(())
    }

    /// Settings the statistics engine is built with.
    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            n_most_freq_targets: self.n_most_freq_targets,
            train_fraction: self.train_fraction,
            generate_alt_max_cf_no_tries: self.generate_alt_max_cf_no_tries,
            alt_maximize_iters: self.alt_maximize_iters,
            num_rand_cf: self.num_rand_cf,
            without_alt_max: self.without_alt_max,
            with_effect_size_cts: self.with_effect_size_cts,
            compute_also_old_base_pvals: self.compute_also_old_base_pvals,
        }
    }

    /// Whether the run needs every record in memory.
    pub fn whole_corpus(&self) -> bool {
        self.is_10x
    }

    pub fn log(&self) {
        let loc = Locale::en;
        let opt = |p: &Option<PathBuf>| p.as_ref().map_or_else(String::new, |p| p.display().to_string());
        info!("Parameters:");
        info!("is_10X                                  : {}", self.is_10x);
        info!("anchor_count_threshold                  : {}", self.filter.count_threshold.to_formatted_string(&loc));
        info!("anchor_unique_targets_threshold         : {}", self.filter.unique_targets_threshold.to_formatted_string(&loc));
        info!("anchor_samples_threshold                : {}", self.filter.samples_threshold.to_formatted_string(&loc));
        info!("n_most_freq_targets                     : {}", self.n_most_freq_targets);
        info!("n_most_freq_targets_for_stats           : {}", self.n_most_freq_targets_for_stats);
        info!("train_fraction                          : {}", self.train_fraction);
        info!("generate_alt_max_cf_no_tries            : {}", self.generate_alt_max_cf_no_tries);
        info!("alt_maximize_iters                      : {}", self.alt_maximize_iters);
        info!("num_rand_cf                             : {}", self.num_rand_cf);
        info!("without_alt_max                         : {}", self.without_alt_max);
        info!("with_effect_size_cts                    : {}", self.with_effect_size_cts);
        info!("compute_also_old_base_pvals             : {}", self.compute_also_old_base_pvals);
        info!("anchor_list                             : {}", opt(&self.anchor_list));
        info!("cjs_out                                 : {}", opt(&self.cjs_out));
        info!("max_pval_rand_init_alt_max_for_Cjs      : {}", self.max_pval_rand_init_alt_max_for_cjs);
        info!("sample_names                            : {}", opt(&self.sample_names));
        info!("cell_type_samplesheet                   : {}", opt(&self.cell_type_samplesheet));
        info!("Cjs_samplesheet                         : {}", opt(&self.cjs_samplesheet));
        info!("run_mode                                : {:?}", self.run_mode);
        info!("format                                  : {:?}", self.format);
        info!("outpath                                 : {}", self.outpath.display());
        info!("n bins                                  : {}", self.bins.len().to_formatted_string(&loc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params { bins: vec![PathBuf::from("a.bin")], ..Default::default() }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn test_train_fraction_bounds() {
        for bad in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            let p = Params { train_fraction: bad, ..params() };
            assert!(matches!(
                p.validate(),
                Err(MergeError::InvalidParameter { parameter: "train_fraction", .. })
            ));
        }
        let p = Params { train_fraction: 0.999, ..params() };
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_engine_params_follow_options() {
        let p = Params {
            n_most_freq_targets: 3,
            train_fraction: 0.5,
            generate_alt_max_cf_no_tries: 4,
            alt_maximize_iters: 7,
            num_rand_cf: 9,
            with_effect_size_cts: true,
            ..params()
        };
        let engine = p.engine_params();
        assert_eq!(engine.n_most_freq_targets, 3);
        assert_eq!(engine.train_fraction, 0.5);
        assert_eq!(engine.generate_alt_max_cf_no_tries, 4);
        assert_eq!(engine.alt_maximize_iters, 7);
        assert_eq!(engine.num_rand_cf, 9);
        assert!(engine.with_effect_size_cts);
        assert!(!engine.without_alt_max);
        assert_eq!(params().engine_params(), EngineParams::default());
    }

    #[test]
    fn test_no_bins() {
        let p = Params { bins: Vec::new(), ..Default::default() };
        assert!(matches!(
            p.validate(),
            Err(MergeError::InvalidParameter { parameter: "input_list", .. })
        ));
    }

    #[test]
    fn test_samplesheets_need_sample_names() {
        let p = Params {
            is_10x: true,
            cell_type_samplesheet: Some("ct.csv".into()),
            ..params()
        };
        let err = p.validate().unwrap_err();
        assert_eq!(err.to_string(), "--cell-type-samplesheet requires --sample-names");

        let p = Params { cjs_samplesheet: Some("cjs.csv".into()), ..params() };
        assert!(matches!(p.validate(), Err(MergeError::MissingCoConfiguration { .. })));
    }

    #[test]
    fn test_samplesheets_and_10x() {
        let p = Params {
            sample_names: Some("names.txt".into()),
            cell_type_samplesheet: Some("ct.csv".into()),
            ..params()
        };
        assert!(matches!(
            p.validate(),
            Err(MergeError::MissingCoConfiguration { required: "--is-10x", .. })
        ));

        let p = Params {
            is_10x: true,
            sample_names: Some("names.txt".into()),
            cjs_samplesheet: Some("cjs.csv".into()),
            ..params()
        };
        assert!(matches!(p.validate(), Err(MergeError::InvalidParameter { .. })));

        let p = Params { is_10x: true, sample_names: Some("names.txt".into()), ..params() };
        assert!(p.whole_corpus());
        assert!(p.validate().is_ok());
    }
}
