use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use crate::constants::IO_BUFFER_SIZE;
use crate::errors::MergeError;

pub fn base_to_bits(b: u8) -> Option<u64> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

pub fn bits_to_base(bits: u64) -> u8 {
    match bits & 0b11 {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        _ => b'T',
    }
}

/// Packs a nucleotide string, first symbol in the most significant position.
pub fn string_to_kmer(seq: &str) -> Result<u64, MergeError> {
    if seq.len() > 32 {
        return Err(MergeError::InvalidKmer(seq.to_string()));
    }
    let mut v = 0u64;
    for &b in seq.as_bytes() {
        let bits = base_to_bits(b).ok_or_else(|| MergeError::InvalidKmer(seq.to_string()))?;
        v = (v << 2) | bits;
    }
    Ok(v)
}

pub fn kmer_to_string(kmer: u64, len: usize) -> String {
    let mut res = String::with_capacity(len);
    for i in (0..len).rev() {
        res.push(bits_to_base(kmer >> (2 * i)) as char);
    }
    res
}

/// Opens a possibly compressed file behind a large buffer.
pub fn open_reader(path: &Path) -> Result<BufReader<Box<dyn Read>>> {
    let file = File::open(path).with_context(|| format!("cannot open file {}", path.display()))?;
    let (reader, _compression) = niffler::get_reader(Box::new(file))
        .with_context(|| format!("cannot detect compression of {}", path.display()))?;
    Ok(BufReader::with_capacity(IO_BUFFER_SIZE, reader))
}

pub fn read_lines<P>(filename: P) -> Result<io::Lines<BufReader<Box<dyn Read>>>>
where
    P: AsRef<Path>,
{
    Ok(open_reader(filename.as_ref())?.lines())
}

/// Reads the file-of-files listing the bins to merge, one path per line.
pub fn read_fof(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut paths = Vec::new();
    for (idx, line) in read_lines(path)?.enumerate() {
        let line =
            line.with_context(|| format!("read line {} from {}", idx + 1, path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        paths.push(std::path::PathBuf::from(trimmed));
    }
    Ok(paths)
}
