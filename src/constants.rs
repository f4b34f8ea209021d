/// Buffer size for bin readers and every output writer.
pub const IO_BUFFER_SIZE: usize = 1 << 20;

/// Number of bytes in an encoded header.
pub const HEADER_SIZE: usize = 9;

/// Widest encodable field, in bytes.
pub const MAX_FIELD_BYTES: u8 = 8;

/// Above this many unique targets the whole-corpus path skips the statistics engine.
pub const MAX_TARGETS_FOR_10X_STATS: usize = 1_000_000;

/// Homopolymer run length counted by the descriptive statistics.
pub const HOMOPOLYMER_LEN: usize = 5;

/// Number of most frequent targets used for pairwise distances.
pub const MAX_TARGETS_FOR_DISTANCES: usize = 200;
