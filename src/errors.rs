//! Error types for merge failures that callers need to tell apart.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MergeError {
    /// Two bins disagree on a symbol length that must match across the merge.
    #[error("bins have different {field} lengths ({first} in {first_path}, {other} in {other_path})")]
    InconsistentBins {
        field: &'static str,
        first: u8,
        other: u8,
        first_path: String,
        other_path: String,
    },

    /// A single bin switched sample id in the middle of an anchor.
    #[error("sample id changed from {expected} to {found} inside anchor {anchor} of {path}")]
    MixedSamples { anchor: u64, expected: u64, found: u64, path: String },

    /// A value does not fit the byte width declared for its field.
    #[error("{field} value {value} does not fit in {width} byte(s)")]
    ValueTooWide { field: &'static str, value: u64, width: u8 },

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    #[error("invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: &'static str, reason: String },

    /// An option that only works together with another one.
    #[error("{option} requires {required}")]
    MissingCoConfiguration { option: &'static str, required: &'static str },

    #[error("invalid k-mer '{0}'")]
    InvalidKmer(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inconsistent_bins_message() {
        let error = MergeError::InconsistentBins {
            field: "anchor",
            first: 27,
            other: 31,
            first_path: "a.bin".to_string(),
            other_path: "b.bin".to_string(),
        };
        let msg = format!("{error}");
        assert!(msg.contains("different anchor lengths"));
        assert!(msg.contains("27 in a.bin"));
        assert!(msg.contains("31 in b.bin"));
    }

    #[test]
    fn test_missing_co_configuration_message() {
        let error = MergeError::MissingCoConfiguration {
            option: "--cell-type-samplesheet",
            required: "--sample-names",
        };
        assert_eq!(format!("{error}"), "--cell-type-samplesheet requires --sample-names");
    }
}
