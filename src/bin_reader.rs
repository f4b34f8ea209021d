//! One open bin with a single-record lookahead.

use anyhow::{Context, Result};
use log::warn;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::anchor::{AnchorGroup, TargetCount};
use crate::errors::MergeError;
use crate::record::{Header, Record};
use crate::utils::open_reader;

/// Position of the reader relative to its next anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookahead {
    /// Nothing decoded yet.
    Empty,
    /// First record of the next anchor is decoded and `peek_anchor` has
    /// reported it.
    Peeked(Record),
    /// The previous group was taken or skipped. The first record of the next
    /// anchor is decoded but not reported yet.
    Pending(Record),
    /// End of stream reached.
    Exhausted,
}

pub struct BinReader<R: Read = BufReader<Box<dyn Read>>> {
    path: String,
    reader: R,
    header: Header,
    state: Lookahead,
}

impl BinReader {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = open_reader(path)?;
        let mut bin = BinReader::new(reader, path.display().to_string())
            .with_context(|| format!("open bin {}", path.display()))?;
        if bin.peek_anchor()?.is_none() {
            warn!("no anchors in {}", path.display());
        }
        Ok(bin)
    }
}

impl<R: Read> BinReader<R> {
    pub fn new(mut reader: R, path: String) -> Result<Self> {
        let header = Header::load(&mut reader)?;
        Ok(Self { path, reader, header, state: Lookahead::Empty })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        Record::load(&mut self.reader, &self.header)
            .with_context(|| format!("read record from {}", self.path))
    }

    /// Anchor of the next group without consuming it, `None` once exhausted.
    pub fn peek_anchor(&mut self) -> Result<Option<u64>> {
        match self.state {
            Lookahead::Empty => {
                self.state = match self.next_record()? {
                    Some(rec) => Lookahead::Peeked(rec),
                    None => Lookahead::Exhausted,
                };
            }
            Lookahead::Pending(rec) => self.state = Lookahead::Peeked(rec),
            Lookahead::Peeked(_) | Lookahead::Exhausted => {}
        }
        match self.state {
            Lookahead::Peeked(rec) => Ok(Some(rec.anchor)),
            _ => Ok(None),
        }
    }

    fn peeked(&self, op: &str) -> Record {
        match self.state {
            Lookahead::Peeked(rec) => rec,
            state => panic!("{op} on {} requires a peeked anchor, reader is {state:?}", self.path),
        }
    }

    /// Moves every record of the peeked anchor into `group`.
    ///
    /// # Panics
    ///
    /// Panics if the last `peek_anchor` did not return an anchor.
    pub fn take_group(&mut self, group: &mut AnchorGroup) -> Result<()> {
        let first = self.peeked("take_group");
        group.clear();
        group.anchor = first.anchor;
        group.sample_id = first.sample_id;
        group
            .data
            .push(TargetCount { target: first.target, barcode: first.barcode, count: first.count });

        loop {
            match self.next_record()? {
                None => {
                    self.state = Lookahead::Exhausted;
                    break;
                }
                Some(rec) if rec.anchor == first.anchor => {
                    if rec.sample_id != first.sample_id {
                        return Err(MergeError::MixedSamples {
                            anchor: first.anchor,
                            expected: first.sample_id,
                            found: rec.sample_id,
                            path: self.path.clone(),
                        }
                        .into());
                    }
                    group.data.push(TargetCount {
                        target: rec.target,
                        barcode: rec.barcode,
                        count: rec.count,
                    });
                }
                Some(rec) => {
                    self.state = Lookahead::Pending(rec);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Discards every record of the peeked anchor without keeping them.
    ///
    /// # Panics
    ///
    /// Panics if the last `peek_anchor` did not return an anchor.
    pub fn skip(&mut self) -> Result<()> {
        let anchor = self.peeked("skip").anchor;
        loop {
            match self.next_record()? {
                None => {
                    self.state = Lookahead::Exhausted;
                    return Ok(());
                }
                Some(rec) if rec.anchor == anchor => continue,
                Some(rec) => {
                    self.state = Lookahead::Pending(rec);
                    return Ok(());
                }
            }
        }
    }
}
