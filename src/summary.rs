use log::info;
use num_format::{Locale, ToFormattedString};

use crate::anchor::MergedAnchor;

/// Counters accumulated over one run and returned by the merge routines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub tot_filtered_out_anchors: u64,
    pub tot_written_anchors: u64,
    pub tot_written_records: u64,
    /// Samples and targets of the largest contingency matrix, by area.
    pub max_contingency_matrix_size: (u64, u64),
}

impl RunStats {
    pub fn anchor_filtered_out(&mut self) {
        self.tot_filtered_out_anchors += 1;
    }

    pub fn anchor_written(&mut self, merged: &MergedAnchor) {
        self.tot_written_anchors += 1;
        self.tot_written_records += merged.data.len() as u64;
        let samples = merged.counts.n_unique_samples;
        let targets = merged.counts.n_unique_targets;
        let (max_samples, max_targets) = self.max_contingency_matrix_size;
        if max_samples.saturating_mul(max_targets) < samples.saturating_mul(targets) {
            self.max_contingency_matrix_size = (samples, targets);
        }
    }

    pub fn log(&self) {
        let loc = Locale::en;
        info!("tot written anchors: {}", self.tot_written_anchors.to_formatted_string(&loc));
        info!("tot written records: {}", self.tot_written_records.to_formatted_string(&loc));
        info!(
            "n samples in max contingency matrix: {}",
            self.max_contingency_matrix_size.0.to_formatted_string(&loc)
        );
        info!(
            "n targets in max contingency matrix: {}",
            self.max_contingency_matrix_size.1.to_formatted_string(&loc)
        );
        info!(
            "tot filtered out anchors: {}",
            self.tot_filtered_out_anchors.to_formatted_string(&loc)
        );
    }
}
